//! Allow-list of users with an expiry and an admin flag.
//!
//! The relay core only reads entries. Admin commands and the startup bootstrap
//! mutate them through the [`AllowList`] trait.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use relay_common::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// How long a bootstrapped admin entry lasts.
pub const ADMIN_VALIDITY_YEARS: i64 = 100;

/// One allow-list row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowListEntry {
    pub user_id: i64,
    pub is_admin: bool,
    pub expires_at: DateTime<Utc>,
}

impl AllowListEntry {
    /// A regular user valid for `days` days from `now`.
    pub fn member(user_id: i64, days: i64, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            is_admin: false,
            expires_at: now + Duration::days(days),
        }
    }

    /// An admin entry.
    pub fn admin(user_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            is_admin: true,
            expires_at: admin_expiry(now),
        }
    }

    /// Admins are always valid; others until `expires_at`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.is_admin || now < self.expires_at
    }

    /// Time left before expiry, `None` once expired.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        let left = self.expires_at - now;
        (left > Duration::zero()).then_some(left)
    }
}

fn admin_expiry(now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::days(365 * ADMIN_VALIDITY_YEARS)
}

/// Relational allow-list store.
#[async_trait]
pub trait AllowList: Send + Sync {
    /// Look up one user. `Ok(None)` when not listed.
    async fn find(&self, user_id: i64) -> Result<Option<AllowListEntry>>;

    /// Every entry, ordered by user id.
    async fn list_all(&self) -> Result<Vec<AllowListEntry>>;

    /// Insert a new entry. Returns `false` when the user is already listed.
    async fn insert(&self, entry: &AllowListEntry) -> Result<bool>;

    /// Set a non-admin user's expiry. Returns `false` when no such non-admin exists.
    async fn update_expiry(&self, user_id: i64, expires_at: DateTime<Utc>) -> Result<bool>;

    /// Make an existing user admin with the given expiry. Returns `false` when not listed.
    async fn promote_to_admin(&self, user_id: i64, expires_at: DateTime<Utc>) -> Result<bool>;

    /// Delete a non-admin user. Returns `false` when absent or admin.
    async fn delete_non_admin(&self, user_id: i64) -> Result<bool>;
}

// ============================================================================
// SQLite Store
// ============================================================================

/// SQLite-backed allow-list.
#[derive(Clone)]
pub struct SqliteAllowList {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAllowList {
    /// Open (or create) the allow-list database at `db_path`.
    ///
    /// Initializes the schema if it doesn't exist.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::from_connection(Connection::open(db_path)?)
    }

    /// In-memory database, used by tests.
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(include_str!("schema.sql"))
            .map_err(|e| Error::from(e).with_context("Failed to initialize allow-list schema"))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::Internal(format!("allow-list lock poisoned: {e}")))
    }
}

fn parse_datetime(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AllowListEntry> {
    let expires_at: String = row.get(2)?;
    Ok(AllowListEntry {
        user_id: row.get(0)?,
        is_admin: row.get(1)?,
        expires_at: parse_datetime(2, &expires_at)?,
    })
}

#[async_trait]
impl AllowList for SqliteAllowList {
    async fn find(&self, user_id: i64) -> Result<Option<AllowListEntry>> {
        let conn = self.lock()?;
        let entry = conn
            .query_row(
                "SELECT user_id, is_admin, expires_at FROM allowlist_users WHERE user_id = ?1",
                params![user_id],
                map_row,
            )
            .optional()?;
        Ok(entry)
    }

    async fn list_all(&self) -> Result<Vec<AllowListEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT user_id, is_admin, expires_at FROM allowlist_users ORDER BY user_id ASC",
        )?;
        let rows = stmt.query_map([], map_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    async fn insert(&self, entry: &AllowListEntry) -> Result<bool> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();
        let rows = conn.execute(
            r"
            INSERT OR IGNORE INTO allowlist_users (user_id, is_admin, expires_at, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            ",
            params![entry.user_id, entry.is_admin, entry.expires_at.to_rfc3339(), now],
        )?;
        Ok(rows > 0)
    }

    async fn update_expiry(&self, user_id: i64, expires_at: DateTime<Utc>) -> Result<bool> {
        let conn = self.lock()?;
        let rows = conn.execute(
            r"
            UPDATE allowlist_users SET expires_at = ?1, updated_at = ?2
            WHERE user_id = ?3 AND is_admin = 0
            ",
            params![expires_at.to_rfc3339(), Utc::now().to_rfc3339(), user_id],
        )?;
        Ok(rows > 0)
    }

    async fn promote_to_admin(&self, user_id: i64, expires_at: DateTime<Utc>) -> Result<bool> {
        let conn = self.lock()?;
        let rows = conn.execute(
            r"
            UPDATE allowlist_users SET is_admin = 1, expires_at = ?1, updated_at = ?2
            WHERE user_id = ?3
            ",
            params![expires_at.to_rfc3339(), Utc::now().to_rfc3339(), user_id],
        )?;
        Ok(rows > 0)
    }

    async fn delete_non_admin(&self, user_id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "DELETE FROM allowlist_users WHERE user_id = ?1 AND is_admin = 0",
            params![user_id],
        )?;
        Ok(rows > 0)
    }
}

// ============================================================================
// Operations
// ============================================================================

/// Extend a non-admin user by `days`, counting from the later of `now` and the
/// current expiry. Returns the new expiry, or `None` when no such non-admin exists.
pub async fn extend_expiry(
    list: &dyn AllowList,
    user_id: i64,
    days: i64,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>> {
    let Some(entry) = list.find(user_id).await? else {
        return Ok(None);
    };
    if entry.is_admin {
        return Ok(None);
    }

    let base = entry.expires_at.max(now);
    let new_expiry = base + Duration::days(days);
    if list.update_expiry(user_id, new_expiry).await? {
        Ok(Some(new_expiry))
    } else {
        Ok(None)
    }
}

/// Outcome of bootstrapping admins.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    pub added: Vec<i64>,
    pub promoted: Vec<i64>,
    pub unchanged: Vec<i64>,
    pub failed: Vec<i64>,
}

enum Bootstrapped {
    Added,
    Promoted,
    Unchanged,
}

async fn bootstrap_one(
    list: &dyn AllowList,
    user_id: i64,
    now: DateTime<Utc>,
) -> Result<Bootstrapped> {
    match list.find(user_id).await? {
        None => {
            list.insert(&AllowListEntry::admin(user_id, now)).await?;
            Ok(Bootstrapped::Added)
        }
        Some(entry) if !entry.is_admin => {
            list.promote_to_admin(user_id, admin_expiry(now)).await?;
            Ok(Bootstrapped::Promoted)
        }
        Some(_) => Ok(Bootstrapped::Unchanged),
    }
}

/// Ensure every configured admin id is listed as admin.
///
/// Per-id failures are logged and skipped.
pub async fn bootstrap_admins(
    list: &dyn AllowList,
    admin_ids: &[i64],
    now: DateTime<Utc>,
) -> BootstrapReport {
    let mut report = BootstrapReport::default();

    for &user_id in admin_ids {
        match bootstrap_one(list, user_id, now).await {
            Ok(Bootstrapped::Added) => report.added.push(user_id),
            Ok(Bootstrapped::Promoted) => report.promoted.push(user_id),
            Ok(Bootstrapped::Unchanged) => report.unchanged.push(user_id),
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Failed to bootstrap admin user");
                report.failed.push(user_id);
            }
        }
    }

    tracing::info!(
        added = report.added.len(),
        promoted = report.promoted.len(),
        unchanged = report.unchanged.len(),
        failed = report.failed.len(),
        "Admin users bootstrapped"
    );
    report
}
