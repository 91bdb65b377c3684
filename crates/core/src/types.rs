use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::validation::{parse_date_applied, ValidationError};

/// Status assigned to applications created without an explicit status.
pub const DEFAULT_STATUS: &str = "Applied";

/// A tracked job application as stored and returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: i64,
    pub company: String,
    pub role: String,
    pub date_applied: Option<NaiveDate>,
    pub status: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Application {
    /// Overwrites the fields present in `patch`, leaving every other field untouched.
    ///
    /// `id` and `created_at` are never part of a patch.
    pub fn apply(&mut self, patch: ValidatedPatch) {
        if let Some(company) = patch.company {
            self.company = company;
        }
        if let Some(role) = patch.role {
            self.role = role;
        }
        if let Some(date_applied) = patch.date_applied {
            self.date_applied = date_applied;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(notes) = patch.notes {
            self.notes = notes;
        }
    }
}

/// Request payload for creating an application.
///
/// Unknown keys, including client supplied `id` and `created_at`, are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewApplication {
    pub company: String,
    pub role: String,
    #[serde(default)]
    pub date_applied: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewApplication {
    /// Parses the date and fills in the default status.
    pub fn validate(self) -> Result<ValidatedApplication, ValidationError> {
        let date_applied = match self.date_applied.as_deref() {
            Some(raw) => parse_date_applied(raw)?,
            None => None,
        };

        Ok(ValidatedApplication {
            company: self.company,
            role: self.role,
            date_applied,
            status: self.status.unwrap_or_else(|| DEFAULT_STATUS.to_string()),
            notes: self.notes,
        })
    }
}

/// Create payload after date parsing and defaulting, ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedApplication {
    pub company: String,
    pub role: String,
    pub date_applied: Option<NaiveDate>,
    pub status: String,
    pub notes: Option<String>,
}

/// Request payload for a partial update.
///
/// The outer `Option` records whether the key was present at all, the inner
/// one whether it carried `null`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApplicationPatch {
    #[serde(default, deserialize_with = "present")]
    pub company: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub role: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub date_applied: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub status: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub notes: Option<Option<String>>,
}

impl ApplicationPatch {
    /// Parses the date and rejects `null` for fields that cannot be empty.
    pub fn validate(self) -> Result<ValidatedPatch, ValidationError> {
        let date_applied = match self.date_applied {
            Some(Some(raw)) => Some(parse_date_applied(&raw)?),
            Some(None) => Some(None),
            None => None,
        };

        Ok(ValidatedPatch {
            company: required("company", self.company)?,
            role: required("role", self.role)?,
            date_applied,
            status: required("status", self.status)?,
            notes: self.notes,
        })
    }
}

/// Partial update with parsed values; `None` means "leave unchanged".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidatedPatch {
    pub company: Option<String>,
    pub role: Option<String>,
    pub date_applied: Option<Option<NaiveDate>>,
    pub status: Option<String>,
    pub notes: Option<Option<String>>,
}

impl ValidatedPatch {
    pub fn is_empty(&self) -> bool {
        self.company.is_none()
            && self.role.is_none()
            && self.date_applied.is_none()
            && self.status.is_none()
            && self.notes.is_none()
    }
}

fn required(
    field: &'static str,
    value: Option<Option<String>>,
) -> Result<Option<String>, ValidationError> {
    match value {
        Some(Some(value)) => Ok(Some(value)),
        Some(None) => Err(ValidationError::NullField(field)),
        None => Ok(None),
    }
}

// Only invoked when the key exists, so a JSON `null` becomes `Some(None)`.
fn present<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
