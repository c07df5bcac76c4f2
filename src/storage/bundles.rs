//! Persistence for support bundles.
//!
//! Every state transition is a single guarded SQL statement, so concurrent
//! creation jobs, API callers, and the cleanup loop never interleave on one
//! record:
//!
//! - `update` only applies while the row is still `pending`;
//! - `remove` only applies once the row has left `pending`.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Pool, StoreError};
use crate::bundle::{
    Bundle, BundleError, BundleOutcome, BundleResult, BundleState, CollectorFailure, Principal,
};

const SELECT_COLUMNS: &str = "uid, state, creator, collectors_json, created_at, expires_at, \
                              error, collector_errors_json, length(archive)";

/// SQLite-backed bundle store. Cheap to clone.
#[derive(Clone)]
pub struct BundleStore {
    pool: Pool,
    retention: Duration,
}

impl BundleStore {
    pub fn new(pool: Pool, retention: Duration) -> Self {
        Self { pool, retention }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Allocate a new uid and persist a `Pending` record for it.
    pub fn create(&self, principal: &Principal, collectors: &[String]) -> BundleResult<Bundle> {
        let created_at = now_secs();
        let bundle = Bundle {
            uid: uuid::Uuid::new_v4().to_string(),
            state: BundleState::Pending,
            creator: principal.login.clone(),
            collectors: collectors.to_vec(),
            created_at,
            expires_at: created_at + self.retention,
            error: None,
            collector_errors: Vec::new(),
            archive_size: None,
            archive: None,
        };

        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO support_bundles (uid, state, creator, collectors_json, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                bundle.uid,
                bundle.state.as_str(),
                bundle.creator,
                serde_json::to_string(&bundle.collectors)?,
                bundle.created_at.timestamp(),
                bundle.expires_at.timestamp(),
            ],
        )?;

        Ok(bundle)
    }

    /// Fetch one bundle, archive included.
    pub fn get(&self, uid: &str) -> BundleResult<Bundle> {
        let conn = self.pool.get()?;
        let sql = format!("SELECT {}, archive FROM support_bundles WHERE uid = ?1", SELECT_COLUMNS);
        let row = conn
            .query_row(&sql, params![uid], |row| {
                let raw = RawBundle::from_row(row)?;
                let archive: Option<Vec<u8>> = row.get(9)?;
                Ok((raw, archive))
            })
            .optional()?;

        match row {
            Some((raw, archive)) => {
                let mut bundle = raw.decode()?;
                bundle.archive = archive;
                Ok(bundle)
            }
            None => Err(BundleError::NotFound {
                uid: uid.to_string(),
            }),
        }
    }

    /// All bundles, oldest first. Archives are not loaded.
    pub fn list(&self) -> BundleResult<Vec<Bundle>> {
        let conn = self.pool.get()?;
        let sql = format!(
            "SELECT {} FROM support_bundles ORDER BY created_at, uid",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], RawBundle::from_row)?;

        let mut list = Vec::new();
        for r in rows {
            list.push(r?.decode()?);
        }
        Ok(list)
    }

    /// Record the terminal outcome of a bundle. Applies at most once per uid.
    pub fn update(&self, uid: &str, outcome: &BundleOutcome) -> BundleResult<()> {
        if !outcome.state.is_terminal() {
            return Err(BundleError::InvalidState {
                uid: uid.to_string(),
                state: outcome.state,
            });
        }

        let conn = self.pool.get()?;
        let changed = conn.execute(
            "UPDATE support_bundles
             SET state = ?1, archive = ?2, error = ?3, collector_errors_json = ?4,
                 updated_at = datetime('now')
             WHERE uid = ?5 AND state = 'pending'",
            params![
                outcome.state.as_str(),
                outcome.archive,
                outcome.error,
                serde_json::to_string(&outcome.collector_errors)?,
                uid,
            ],
        )?;

        if changed == 0 {
            return Err(unchanged(&conn, uid));
        }
        Ok(())
    }

    /// Delete a bundle and its archive. Refused while the bundle is pending.
    pub fn remove(&self, uid: &str) -> BundleResult<()> {
        let conn = self.pool.get()?;
        let changed = conn.execute(
            "DELETE FROM support_bundles WHERE uid = ?1 AND state != 'pending'",
            params![uid],
        )?;

        if changed == 0 {
            return Err(unchanged(&conn, uid));
        }
        Ok(())
    }

    pub fn stats_count(&self) -> BundleResult<i64> {
        let conn = self.pool.get()?;
        let count = conn.query_row("SELECT COUNT(*) FROM support_bundles", [], |row| row.get(0))?;
        Ok(count)
    }
}

/// Explain why a guarded statement touched no rows.
fn unchanged(conn: &Connection, uid: &str) -> BundleError {
    let state: rusqlite::Result<Option<String>> = conn
        .query_row(
            "SELECT state FROM support_bundles WHERE uid = ?1",
            params![uid],
            |row| row.get(0),
        )
        .optional();

    match state {
        Ok(None) => BundleError::NotFound {
            uid: uid.to_string(),
        },
        Ok(Some(state)) => match state.parse() {
            Ok(state) => BundleError::InvalidState {
                uid: uid.to_string(),
                state,
            },
            Err(reason) => StoreError::Corrupt {
                uid: uid.to_string(),
                reason,
            }
            .into(),
        },
        Err(e) => e.into(),
    }
}

fn now_secs() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp(now.timestamp(), 0).unwrap_or(now)
}

/// Column values as stored, before JSON and enum decoding.
struct RawBundle {
    uid: String,
    state: String,
    creator: String,
    collectors_json: String,
    created_at: i64,
    expires_at: i64,
    error: Option<String>,
    collector_errors_json: String,
    archive_size: Option<i64>,
}

impl RawBundle {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            uid: row.get(0)?,
            state: row.get(1)?,
            creator: row.get(2)?,
            collectors_json: row.get(3)?,
            created_at: row.get(4)?,
            expires_at: row.get(5)?,
            error: row.get(6)?,
            collector_errors_json: row.get(7)?,
            archive_size: row.get(8)?,
        })
    }

    fn decode(self) -> Result<Bundle, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            uid: self.uid.clone(),
            reason,
        };

        let state: BundleState = self.state.parse().map_err(corrupt)?;
        let created_at = DateTime::from_timestamp(self.created_at, 0)
            .ok_or_else(|| corrupt(format!("invalid created_at {}", self.created_at)))?;
        let expires_at = DateTime::from_timestamp(self.expires_at, 0)
            .ok_or_else(|| corrupt(format!("invalid expires_at {}", self.expires_at)))?;
        let collectors: Vec<String> = serde_json::from_str(&self.collectors_json)?;
        let collector_errors: Vec<CollectorFailure> =
            serde_json::from_str(&self.collector_errors_json)?;

        Ok(Bundle {
            uid: self.uid,
            state,
            creator: self.creator,
            collectors,
            created_at,
            expires_at,
            error: self.error,
            collector_errors,
            archive_size: self.archive_size.map(|n| n.max(0) as u64),
            archive: None,
        })
    }
}
