use std::{str::FromStr, sync::Arc, time::Duration};

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{
    postgres::{PgPool, PgPoolOptions},
    sqlite::{
        SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
    },
};
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::info;

use job_tracker_core::{Application, ValidatedApplication, ValidatedPatch};

const SQLITE_MAX_CONNECTIONS: u32 = 5;
const POSTGRES_MAX_CONNECTIONS: u32 = 10;
const SQLITE_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SQLITE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS application (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    company TEXT NOT NULL,
    role TEXT NOT NULL,
    date_applied DATE,
    status TEXT NOT NULL DEFAULT 'Applied',
    notes TEXT,
    created_at DATETIME NOT NULL
)
"#;

const POSTGRES_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS application (
    id BIGSERIAL PRIMARY KEY,
    company TEXT NOT NULL,
    role TEXT NOT NULL,
    date_applied DATE,
    status TEXT NOT NULL DEFAULT 'Applied',
    notes TEXT,
    created_at TIMESTAMPTZ NOT NULL
)
"#;

// Both drivers accept `$N` placeholders, so the statements are shared.
const INSERT_APPLICATION: &str = "INSERT INTO application \
     (company, role, date_applied, status, notes, created_at) \
     VALUES ($1, $2, $3, $4, $5, $6) \
     RETURNING id, company, role, date_applied, status, notes, created_at";

const SELECT_ALL_APPLICATIONS: &str =
    "SELECT id, company, role, date_applied, status, notes, created_at \
     FROM application ORDER BY id ASC";

const SELECT_APPLICATION: &str = "SELECT id, company, role, date_applied, status, notes, created_at \
     FROM application WHERE id = $1";

const UPDATE_APPLICATION: &str = "UPDATE application \
     SET company = $2, role = $3, date_applied = $4, status = $5, notes = $6 \
     WHERE id = $1 \
     RETURNING id, company, role, date_applied, status, notes, created_at";

const DELETE_APPLICATION: &str = "DELETE FROM application WHERE id = $1";

/// Runs `$body` against whichever pool backs the store, binding it to `$pool`.
macro_rules! on_pool {
    ($store:expr, $pool:ident => $body:expr) => {
        match $store {
            StorePool::Sqlite($pool) => $body,
            StorePool::Postgres($pool) => $body,
        }
    };
}

/// Relational backend selected from the connection string scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Sqlite,
    Postgres,
}

impl Backend {
    /// Detects the backend for a connection string.
    pub fn from_url(database_url: &str) -> Result<Self, StorageError> {
        if database_url.starts_with("sqlite:") {
            Ok(Self::Sqlite)
        } else if database_url.starts_with("postgresql://") || database_url.starts_with("postgres://")
        {
            Ok(Self::Postgres)
        } else {
            let scheme = database_url
                .split_once(':')
                .map(|(scheme, _)| scheme)
                .unwrap_or(database_url);
            Err(StorageError::UnsupportedScheme(scheme.to_string()))
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
        }
    }
}

#[derive(Clone)]
enum StorePool {
    Sqlite(SqlitePool),
    Postgres(PgPool),
}

/// Serialises writers on backends that cannot run them concurrently.
///
/// SQLite gets a shared lock: a deferred transaction that reads before it
/// writes fails with `SQLITE_BUSY_SNAPSHOT` when another writer commits in
/// between, and the busy timeout does not retry that case. PostgreSQL
/// handles concurrent writers itself and gets no lock.
#[derive(Clone, Default)]
struct WriteGate(Option<Arc<Mutex<()>>>);

impl WriteGate {
    fn serialized() -> Self {
        Self(Some(Arc::new(Mutex::new(()))))
    }

    async fn enter(&self) -> Option<MutexGuard<'_, ()>> {
        match &self.0 {
            Some(lock) => Some(lock.lock().await),
            None => None,
        }
    }
}

/// Top-level database handle that owns the connection pool.
///
/// Cloning is cheap; every clone shares the same pool and write gate.
#[derive(Clone)]
pub struct Database {
    pool: StorePool,
    writes: WriteGate,
}

impl Database {
    /// Establishes a connection pool for the provided connection string.
    ///
    /// SQLite files are created when missing. Writes against SQLite are
    /// serialised inside the process; reads run concurrently.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let backend = Backend::from_url(database_url)?;
        let (pool, writes) = match backend {
            Backend::Sqlite => (
                StorePool::Sqlite(connect_sqlite(database_url).await?),
                WriteGate::serialized(),
            ),
            Backend::Postgres => (
                StorePool::Postgres(
                    PgPoolOptions::new()
                        .max_connections(POSTGRES_MAX_CONNECTIONS)
                        .connect(database_url)
                        .await
                        .map_err(StorageError::Connect)?,
                ),
                WriteGate::default(),
            ),
        };

        info!(stage = "storage", backend = backend.as_str(), "connected to store");
        Ok(Self { pool, writes })
    }

    /// Returns the backend in use.
    pub fn backend(&self) -> Backend {
        match self.pool {
            StorePool::Sqlite(_) => Backend::Sqlite,
            StorePool::Postgres(_) => Backend::Postgres,
        }
    }

    /// Creates the `application` table when it does not exist yet.
    ///
    /// Existing tables are left as they are; column changes are not migrated.
    pub async fn ensure_schema(&self) -> Result<(), StorageError> {
        let ddl = match self.backend() {
            Backend::Sqlite => SQLITE_SCHEMA,
            Backend::Postgres => POSTGRES_SCHEMA,
        };
        on_pool!(&self.pool, pool => {
            sqlx::query(ddl)
                .execute(pool)
                .await
                .map_err(StorageError::Schema)?;
        });
        info!(stage = "storage", table = "application", "schema ready");
        Ok(())
    }

    /// Returns a handle to operate on application records.
    pub fn applications(&self) -> ApplicationRepository {
        ApplicationRepository {
            pool: self.pool.clone(),
            writes: self.writes.clone(),
        }
    }

    /// Waits for checked-out connections to return and closes the pool.
    pub async fn close(&self) {
        on_pool!(&self.pool, pool => pool.close().await);
    }
}

async fn connect_sqlite(database_url: &str) -> Result<SqlitePool, StorageError> {
    let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");

    let mut options = SqliteConnectOptions::from_str(database_url)
        .map_err(StorageError::Connect)?
        .create_if_missing(true)
        .busy_timeout(SQLITE_BUSY_TIMEOUT)
        .synchronous(SqliteSynchronous::Normal);
    if !in_memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    // Every connection to `:memory:` opens its own database, so keep exactly
    // one alive for the lifetime of the pool.
    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(SQLITE_MAX_CONNECTIONS)
    };

    pool_options
        .connect_with(options)
        .await
        .map_err(StorageError::Connect)
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("unsupported database url scheme '{0}'")]
    UnsupportedScheme(String),
    #[error("failed to connect to database: {0}")]
    Connect(sqlx::Error),
    #[error("failed to create schema: {0}")]
    Schema(sqlx::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository for the `application` table.
///
/// Each method is one unit of work: connections are checked out of the pool
/// for the call and returned on every exit path.
#[derive(Clone)]
pub struct ApplicationRepository {
    pool: StorePool,
    writes: WriteGate,
}

impl ApplicationRepository {
    /// Inserts a new record and returns it with the generated id.
    pub async fn insert(
        &self,
        record: &ValidatedApplication,
        created_at: DateTime<Utc>,
    ) -> Result<Application, StorageError> {
        let _write = self.writes.enter().await;
        let row = on_pool!(&self.pool, pool => {
            sqlx::query_as::<_, ApplicationRow>(INSERT_APPLICATION)
                .bind(&record.company)
                .bind(&record.role)
                .bind(record.date_applied)
                .bind(&record.status)
                .bind(record.notes.as_deref())
                .bind(created_at)
                .fetch_one(pool)
                .await?
        });

        Ok(row.into_domain())
    }

    /// Lists every record in ascending id order.
    pub async fn list(&self) -> Result<Vec<Application>, StorageError> {
        let rows = on_pool!(&self.pool, pool => {
            sqlx::query_as::<_, ApplicationRow>(SELECT_ALL_APPLICATIONS)
                .fetch_all(pool)
                .await?
        });

        Ok(rows.into_iter().map(ApplicationRow::into_domain).collect())
    }

    /// Fetches a single record, returning `None` when the id is unknown.
    pub async fn get(&self, id: i64) -> Result<Option<Application>, StorageError> {
        let row = on_pool!(&self.pool, pool => {
            sqlx::query_as::<_, ApplicationRow>(SELECT_APPLICATION)
                .bind(id)
                .fetch_optional(pool)
                .await?
        });

        Ok(row.map(ApplicationRow::into_domain))
    }

    /// Merges `patch` onto the stored record inside one transaction.
    ///
    /// Returns `None` when the id is unknown. A dropped transaction rolls back.
    /// An empty patch writes nothing and returns the current record.
    pub async fn update(
        &self,
        id: i64,
        patch: ValidatedPatch,
    ) -> Result<Option<Application>, StorageError> {
        if patch.is_empty() {
            return self.get(id).await;
        }

        let _write = self.writes.enter().await;
        on_pool!(&self.pool, pool => {
            let mut tx = pool.begin().await?;

            let existing = sqlx::query_as::<_, ApplicationRow>(SELECT_APPLICATION)
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
            let Some(existing) = existing else {
                return Ok(None);
            };

            let mut application = existing.into_domain();
            application.apply(patch);

            let row = sqlx::query_as::<_, ApplicationRow>(UPDATE_APPLICATION)
                .bind(id)
                .bind(&application.company)
                .bind(&application.role)
                .bind(application.date_applied)
                .bind(&application.status)
                .bind(application.notes.as_deref())
                .fetch_one(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok(Some(row.into_domain()))
        })
    }

    /// Deletes a record. Returns `false` when nothing matched the id.
    pub async fn delete(&self, id: i64) -> Result<bool, StorageError> {
        let _write = self.writes.enter().await;
        let affected = on_pool!(&self.pool, pool => {
            sqlx::query(DELETE_APPLICATION)
                .bind(id)
                .execute(pool)
                .await?
                .rows_affected()
        });

        Ok(affected > 0)
    }
}

/// Row shape of the `application` table.
#[derive(Debug, sqlx::FromRow)]
pub struct ApplicationRow {
    pub id: i64,
    pub company: String,
    pub role: String,
    pub date_applied: Option<NaiveDate>,
    pub status: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ApplicationRow {
    /// Converts the database row into the domain record.
    pub fn into_domain(self) -> Application {
        Application {
            id: self.id,
            company: self.company,
            role: self.role,
            date_applied: self.date_applied,
            status: self.status,
            notes: self.notes,
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{SubsecRound, TimeZone};
    use tempfile::TempDir;

    async fn setup_db() -> (Database, TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("jobs.db").display());
        let db = Database::connect(&url).await.expect("connect");
        db.ensure_schema().await.expect("schema");
        (db, dir)
    }

    fn record(company: &str, role: &str) -> ValidatedApplication {
        ValidatedApplication {
            company: company.to_string(),
            role: role.to_string(),
            date_applied: None,
            status: "Applied".to_string(),
            notes: None,
        }
    }

    fn created_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 16, 9, 30, 0).unwrap()
    }

    #[test]
    fn detects_backend_from_scheme() {
        assert_eq!(Backend::from_url("sqlite://./jobs.db").unwrap(), Backend::Sqlite);
        assert_eq!(Backend::from_url("sqlite::memory:").unwrap(), Backend::Sqlite);
        assert_eq!(
            Backend::from_url("postgresql://localhost/jobs").unwrap(),
            Backend::Postgres
        );
        assert_eq!(
            Backend::from_url("postgres://localhost/jobs").unwrap(),
            Backend::Postgres
        );
        let err = Backend::from_url("mysql://localhost/jobs").unwrap_err();
        assert!(matches!(err, StorageError::UnsupportedScheme(scheme) if scheme == "mysql"));
    }

    #[tokio::test]
    async fn ensure_schema_is_idempotent() {
        let (db, _dir) = setup_db().await;
        let repo = db.applications();
        repo.insert(&record("Acme", "Engineer"), created_at())
            .await
            .expect("insert");

        db.ensure_schema().await.expect("second run is a no-op");

        let all = repo.list().await.expect("list");
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn insert_assigns_id_and_keeps_fields() {
        let (db, _dir) = setup_db().await;
        let repo = db.applications();
        let mut input = record("Acme", "Engineer");
        input.date_applied = NaiveDate::from_ymd_opt(2024, 3, 15);
        input.notes = Some("referral".to_string());

        let stored = repo.insert(&input, created_at()).await.expect("insert");

        assert!(stored.id > 0);
        assert_eq!(stored.company, "Acme");
        assert_eq!(stored.date_applied, NaiveDate::from_ymd_opt(2024, 3, 15));
        assert_eq!(stored.notes.as_deref(), Some("referral"));
        assert_eq!(stored.created_at, created_at());
    }

    #[tokio::test]
    async fn list_returns_records_in_id_order() {
        let (db, _dir) = setup_db().await;
        let repo = db.applications();
        let first = repo
            .insert(&record("Acme", "Engineer"), created_at())
            .await
            .expect("insert");
        let second = repo
            .insert(&record("Globex", "Analyst"), created_at())
            .await
            .expect("insert");

        let all = repo.list().await.expect("list");
        assert_eq!(all, vec![first.clone(), second]);

        let fetched = repo.get(first.id).await.expect("get");
        assert_eq!(fetched, Some(first));
    }

    #[tokio::test]
    async fn get_returns_none_for_unknown_id() {
        let (db, _dir) = setup_db().await;
        let fetched = db.applications().get(404).await.expect("get");
        assert!(fetched.is_none());
    }

    #[tokio::test]
    async fn update_merges_patch_and_preserves_created_at() {
        let (db, _dir) = setup_db().await;
        let repo = db.applications();
        let now = Utc::now().trunc_subsecs(3);
        let stored = repo
            .insert(&record("Acme", "Engineer"), now)
            .await
            .expect("insert");

        let patch = ValidatedPatch {
            status: Some("Interview".to_string()),
            notes: Some(Some("phone screen".to_string())),
            ..ValidatedPatch::default()
        };
        let updated = repo
            .update(stored.id, patch)
            .await
            .expect("update")
            .expect("record exists");

        assert_eq!(updated.status, "Interview");
        assert_eq!(updated.notes.as_deref(), Some("phone screen"));
        assert_eq!(updated.company, stored.company);
        assert_eq!(updated.created_at, stored.created_at);

        let reread = repo.get(stored.id).await.expect("get");
        assert_eq!(reread, Some(updated));
    }

    #[tokio::test]
    async fn update_returns_none_for_unknown_id() {
        let (db, _dir) = setup_db().await;
        let outcome = db
            .applications()
            .update(99, ValidatedPatch::default())
            .await
            .expect("update");
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn delete_reports_whether_a_row_was_removed() {
        let (db, _dir) = setup_db().await;
        let repo = db.applications();
        let stored = repo
            .insert(&record("Acme", "Engineer"), created_at())
            .await
            .expect("insert");

        assert!(repo.delete(stored.id).await.expect("delete"));
        assert!(!repo.delete(stored.id).await.expect("second delete"));
        assert!(repo.get(stored.id).await.expect("get").is_none());
        assert!(repo.list().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn ids_are_not_reused_after_delete() {
        let (db, _dir) = setup_db().await;
        let repo = db.applications();
        let first = repo
            .insert(&record("Acme", "Engineer"), created_at())
            .await
            .expect("insert");
        repo.delete(first.id).await.expect("delete");

        let second = repo
            .insert(&record("Globex", "Analyst"), created_at())
            .await
            .expect("insert");
        assert!(second.id > first.id);
    }

    #[tokio::test]
    async fn in_memory_store_keeps_data_across_calls() {
        let db = Database::connect("sqlite::memory:").await.expect("connect");
        db.ensure_schema().await.expect("schema");
        let repo = db.applications();
        repo.insert(&record("Acme", "Engineer"), created_at())
            .await
            .expect("insert");

        assert_eq!(repo.list().await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn empty_patch_returns_record_without_writing() {
        let (db, _dir) = setup_db().await;
        let repo = db.applications();
        let stored = repo
            .insert(&record("Acme", "Engineer"), created_at())
            .await
            .expect("insert");

        let unchanged = repo
            .update(stored.id, ValidatedPatch::default())
            .await
            .expect("update");
        assert_eq!(unchanged, Some(stored));

        let missing = repo
            .update(404, ValidatedPatch::default())
            .await
            .expect("update");
        assert!(missing.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_updates_on_file_store_all_succeed() {
        let (db, _dir) = setup_db().await;
        let repo = db.applications();
        let stored = repo
            .insert(&record("Acme", "Engineer"), created_at())
            .await
            .expect("insert");

        let tasks: Vec<_> = (0..40)
            .map(|n| {
                let repo = repo.clone();
                tokio::spawn(async move {
                    let patch = ValidatedPatch {
                        status: Some(format!("Round {n}")),
                        ..ValidatedPatch::default()
                    };
                    repo.update(stored.id, patch).await
                })
            })
            .collect();

        for task in tasks {
            let updated = task
                .await
                .expect("task joins")
                .expect("update succeeds")
                .expect("record exists");
            assert_eq!(updated.company, "Acme");
            assert!(updated.status.starts_with("Round "));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_mixed_writes_on_file_store_all_succeed() {
        let (db, _dir) = setup_db().await;
        let repo = db.applications();
        let mut seeded = Vec::new();
        for n in 0..10 {
            let stored = repo
                .insert(&record(&format!("Seed {n}"), "Engineer"), created_at())
                .await
                .expect("insert");
            seeded.push(stored.id);
        }

        let mut tasks = Vec::new();
        for (n, id) in seeded.iter().copied().enumerate() {
            let inserter = repo.clone();
            tasks.push(tokio::spawn(async move {
                inserter
                    .insert(&record(&format!("New {n}"), "Analyst"), created_at())
                    .await
                    .map(|_| ())
            }));

            let writer = repo.clone();
            tasks.push(tokio::spawn(async move {
                if n % 2 == 0 {
                    writer.delete(id).await.map(|_| ())
                } else {
                    let patch = ValidatedPatch {
                        notes: Some(Some(format!("note {n}"))),
                        ..ValidatedPatch::default()
                    };
                    writer.update(id, patch).await.map(|_| ())
                }
            }));
        }

        for task in tasks {
            task.await.expect("task joins").expect("write succeeds");
        }

        let all = repo.list().await.expect("list");
        assert_eq!(all.len(), 15);
        assert!(all.windows(2).all(|pair| pair[0].id < pair[1].id));
    }
}
