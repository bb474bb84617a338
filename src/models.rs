use chrono::{DateTime, Utc};
use rocket_db_pools::sqlx::FromRow;
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::OptOutError;

/// List used when a caller does not name one.
pub const DEFAULT_LIST: &str = "marketing";

/// Canonical form of an email address for storage and lookups.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

// ===== Opt-out Models =====

/// A persisted opt-out. The row existing is the whole state: no row means subscribed.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema, PartialEq, Eq)]
pub struct OptOutRecord {
    pub id: i64,
    pub email: String,
    #[serde(rename = "companyId")]
    pub company_id: i64,
    pub list: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}


/// Normalized `(email, company_id, list)` tuple addressing one opt-out.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OptOutKey {
    email: String,
    company_id: i64,
    list: String,
}

impl OptOutKey {
    /// Build a key, normalizing the email and rejecting blank fields.
    pub fn new(email: &str, company_id: i64, list: &str) -> Result<Self, OptOutError> {
        let email = normalize_email(email);
        if email.is_empty() {
            return Err(OptOutError::InvalidArgument("Missing email".into()));
        }

        let list = list.trim();
        if list.is_empty() {
            return Err(OptOutError::InvalidArgument("Missing list".into()));
        }

        Ok(Self {
            email,
            company_id,
            list: list.to_string(),
        })
    }

    /// Key on the default `marketing` list.
    pub fn marketing(email: &str, company_id: i64) -> Result<Self, OptOutError> {
        Self::new(email, company_id, DEFAULT_LIST)
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn company_id(&self) -> i64 {
        self.company_id
    }

    pub fn list(&self) -> &str {
        &self.list
    }
}

/// Opt-out event reported by an external mail provider.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct BounceEvent {
    pub email: String,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

// ===== Response Envelopes =====

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DataResponse<T> {
    pub data: T,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_normalized() {
        let key = OptOutKey::new("  TEST@Example.ORG  ", 7, "marketing").expect("valid key");
        assert_eq!(key.email(), "test@example.org");
        assert_eq!(key.company_id(), 7);
        assert_eq!(key.list(), "marketing");
        assert_eq!(key, OptOutKey::marketing("test@example.org", 7).expect("valid key"));
    }

    #[test]
    fn blank_fields_are_rejected() {
        assert!(matches!(
            OptOutKey::new(" ", 7, "marketing"),
            Err(OptOutError::InvalidArgument(_))
        ));
        assert!(matches!(
            OptOutKey::new("a@example.org", 7, ""),
            Err(OptOutError::InvalidArgument(_))
        ));
    }
}
