//! Support bundle data model and error taxonomy.

pub mod archive;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::StoreError;

/// Convenience alias for operations on bundles.
pub type BundleResult<T> = std::result::Result<T, BundleError>;

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("support bundle {uid} not found")]
    NotFound { uid: String },

    #[error("support bundle {uid} is {state}; operation not permitted")]
    InvalidState { uid: String, state: BundleState },

    #[error("bundle store failure: {0}")]
    Store(#[from] StoreError),

    #[error("bundle collection failed: {0}")]
    CollectionFault(String),
}

/// Lifecycle state of a bundle.
///
/// A bundle starts `Pending` and moves to exactly one terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleState {
    Pending,
    Complete,
    Error,
}

impl BundleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BundleState::Pending => "pending",
            BundleState::Complete => "complete",
            BundleState::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BundleState::Pending)
    }
}

impl std::fmt::Display for BundleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for BundleState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BundleState::Pending),
            "complete" => Ok(BundleState::Complete),
            "error" => Ok(BundleState::Error),
            other => Err(format!("unknown bundle state '{}'", other)),
        }
    }
}

/// The requesting user, as handed to us by the host's auth layer.
///
/// Only `login` is persisted (as the bundle creator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub login: String,
    pub user_id: Option<i64>,
    pub is_server_admin: bool,
}

impl Principal {
    pub fn new(login: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            user_id: None,
            is_server_admin: false,
        }
    }

    /// Builder-style setter for `user_id`.
    pub fn with_user_id(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Builder-style setter for `is_server_admin`.
    pub fn with_server_admin(mut self, is_server_admin: bool) -> Self {
        self.is_server_admin = is_server_admin;
        self
    }
}

/// A collector that failed while a bundle was being assembled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorFailure {
    pub collector: String,
    pub error: String,
}

/// A diagnostic support bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bundle {
    pub uid: String,
    pub state: BundleState,
    pub creator: String,
    /// Collector uids requested at creation. Empty means "all".
    pub collectors: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Failure description once the bundle is in the `Error` state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub collector_errors: Vec<CollectorFailure>,
    /// Size of the archive in bytes, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_size: Option<u64>,
    /// The compressed archive. Only loaded by single-bundle reads.
    #[serde(skip)]
    pub archive: Option<Vec<u8>>,
}

impl Bundle {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// File name offered to clients downloading the archive.
    pub fn download_filename(&self) -> String {
        format!("support-bundle-{}.tar.zst", self.uid)
    }
}

/// The single completion write a creation job performs.
#[derive(Debug, Clone)]
pub struct BundleOutcome {
    pub state: BundleState,
    pub archive: Option<Vec<u8>>,
    pub error: Option<String>,
    pub collector_errors: Vec<CollectorFailure>,
}

impl BundleOutcome {
    pub fn complete(archive: Vec<u8>, collector_errors: Vec<CollectorFailure>) -> Self {
        Self {
            state: BundleState::Complete,
            archive: Some(archive),
            error: None,
            collector_errors,
        }
    }

    pub fn failed(error: impl Into<String>, collector_errors: Vec<CollectorFailure>) -> Self {
        Self {
            state: BundleState::Error,
            archive: None,
            error: Some(error.into()),
            collector_errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_state_round_trips_through_str() {
        for state in [BundleState::Pending, BundleState::Complete, BundleState::Error] {
            assert_eq!(state.as_str().parse::<BundleState>().unwrap(), state);
        }
        assert!("timeout".parse::<BundleState>().is_err());
    }

    #[test]
    fn test_only_pending_is_not_terminal() {
        assert!(!BundleState::Pending.is_terminal());
        assert!(BundleState::Complete.is_terminal());
        assert!(BundleState::Error.is_terminal());
    }

    #[test]
    fn test_expiry_is_inclusive() {
        let now = Utc::now();
        let bundle = Bundle {
            uid: "abc".to_string(),
            state: BundleState::Complete,
            creator: "admin".to_string(),
            collectors: vec![],
            created_at: now - Duration::hours(1),
            expires_at: now,
            error: None,
            collector_errors: vec![],
            archive_size: None,
            archive: None,
        };
        assert!(bundle.is_expired(now));
        assert!(!bundle.is_expired(now - Duration::seconds(1)));
        assert_eq!(bundle.download_filename(), "support-bundle-abc.tar.zst");
    }
}
