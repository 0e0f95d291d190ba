//! Server store
//!
//! Persistent IP bans and user accounts in SQLite. Bans are matched against
//! the peer address of every new connection before the login is read.
//! Account passwords are stored as `sha256;<salt>;<digest>`.

use std::fmt;
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use subtle::ConstantTimeEq;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// An IP address or CIDR range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpRange {
    network: IpAddr,
    prefix: u8,
}

impl IpRange {
    /// Range matching exactly one address
    #[must_use]
    pub fn single(addr: IpAddr) -> Self {
        let prefix = if addr.is_ipv4() { 32 } else { 128 };
        Self {
            network: addr,
            prefix,
        }
    }

    /// Whether the range contains an address
    ///
    /// IPv4-mapped IPv6 addresses match IPv4 ranges.
    #[must_use]
    pub fn contains(&self, addr: IpAddr) -> bool {
        let addr = match addr {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(addr, IpAddr::V4),
            v4 => v4,
        };
        match (self.network, addr) {
            (IpAddr::V4(net), IpAddr::V4(a)) => {
                prefix_match(u128::from(u32::from(net)), u128::from(u32::from(a)), 32, self.prefix)
            }
            (IpAddr::V6(net), IpAddr::V6(a)) => {
                prefix_match(u128::from(net), u128::from(a), 128, self.prefix)
            }
            _ => false,
        }
    }
}

fn prefix_match(net: u128, addr: u128, bits: u8, prefix: u8) -> bool {
    if prefix == 0 {
        return true;
    }
    let shift = u32::from(bits - prefix);
    (net >> shift) == (addr >> shift)
}

impl FromStr for IpRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || Error::BadRequest(format!("invalid address or range: {s}"));
        let (addr, prefix) = match s.trim().split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s.trim(), None),
        };
        let network: IpAddr = addr.parse().map_err(|_| bad())?;
        let max = if network.is_ipv4() { 32 } else { 128 };
        let prefix = match prefix {
            Some(p) => p.parse::<u8>().map_err(|_| bad())?,
            None => max,
        };
        if prefix > max {
            return Err(bad());
        }
        Ok(Self { network, prefix })
    }
}

impl fmt::Display for IpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let max = if self.network.is_ipv4() { 32 } else { 128 };
        if self.prefix == max {
            write!(f, "{}", self.network)
        } else {
            write!(f, "{}/{}", self.network, self.prefix)
        }
    }
}

/// A server-wide IP ban
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BanEntry {
    /// Row id
    pub id: i64,
    /// Banned address or CIDR range
    pub address: String,
    /// Reason shown to administrators
    pub reason: String,
    /// Expiry, `None` for permanent
    pub expires_at: Option<DateTime<Utc>>,
    /// When the ban was added
    pub created_at: DateTime<Utc>,
}

impl BanEntry {
    /// Whether the ban is in effect at `now`
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expires| expires > now)
    }
}

/// Request to add a ban
#[derive(Debug, Clone, Deserialize)]
pub struct NewBan {
    /// Address or CIDR range
    pub address: String,
    /// Reason
    #[serde(default)]
    pub reason: String,
    /// Expiry, `None` for permanent
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// A registered user account
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    /// Row id
    pub id: i64,
    /// Login name
    pub username: String,
    /// Locked accounts cannot log in
    pub locked: bool,
    /// Moderators are operators in every session
    pub moderator: bool,
    /// When the account was created
    pub created_at: DateTime<Utc>,
}

/// Request to create an account
#[derive(Debug, Clone, Deserialize)]
pub struct NewAccount {
    /// Login name
    pub username: String,
    /// Plain text password, hashed before storing
    pub password: String,
    /// Moderator flag
    #[serde(default)]
    pub moderator: bool,
    /// Locked flag
    #[serde(default)]
    pub locked: bool,
}

/// Partial account update
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountUpdate {
    /// New password
    #[serde(default)]
    pub password: Option<String>,
    /// New locked flag
    #[serde(default)]
    pub locked: Option<bool>,
    /// New moderator flag
    #[serde(default)]
    pub moderator: Option<bool>,
}

/// Outcome of checking login credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountCheck {
    /// The name is not a registered account
    NoAccount,
    /// Password matched
    Ok(Account),
    /// Password missing or wrong
    BadPassword,
    /// Account is locked
    Locked,
}

/// SQLite-backed ban list and account store
#[derive(Clone)]
pub struct ServerStore {
    pool: SqlitePool,
}

impl ServerStore {
    /// Open or create the database file
    pub async fn from_path(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;

        info!("Server database opened at {}", db_path.display());
        Ok(store)
    }

    /// Create an in-memory store
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;

        debug!("In-memory server store initialized");
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ipbans (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                address TEXT NOT NULL,
                reason TEXT NOT NULL DEFAULT '',
                expires_at TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE COLLATE NOCASE,
                password_hash TEXT NOT NULL,
                locked INTEGER NOT NULL DEFAULT 0,
                moderator INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ---- bans ----

    /// Add a ban
    pub async fn add_ban(&self, ban: &NewBan) -> Result<BanEntry> {
        let range: IpRange = ban.address.parse()?;
        let created_at = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO ipbans (address, reason, expires_at, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(range.to_string())
        .bind(&ban.reason)
        .bind(ban.expires_at.map(|t| t.to_rfc3339()))
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(BanEntry {
            id: result.last_insert_rowid(),
            address: range.to_string(),
            reason: ban.reason.clone(),
            expires_at: ban.expires_at,
            created_at,
        })
    }

    /// List all bans, expired ones included
    pub async fn list_bans(&self) -> Result<Vec<BanEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, address, reason, expires_at, created_at
            FROM ipbans
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let expires_at: Option<String> = row.get("expires_at");
                let created_at: String = row.get("created_at");
                BanEntry {
                    id: row.get("id"),
                    address: row.get("address"),
                    reason: row.get("reason"),
                    expires_at: expires_at.as_deref().and_then(parse_time),
                    created_at: parse_time(&created_at).unwrap_or_else(Utc::now),
                }
            })
            .collect())
    }

    /// Remove a ban
    pub async fn delete_ban(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM ipbans WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Active ban matching an address, if any
    pub async fn find_ban(&self, addr: IpAddr) -> Result<Option<BanEntry>> {
        let now = Utc::now();
        Ok(self.list_bans().await?.into_iter().find(|ban| {
            ban.is_active(now)
                && ban
                    .address
                    .parse::<IpRange>()
                    .is_ok_and(|range| range.contains(addr))
        }))
    }

    // ---- accounts ----

    /// Create an account
    pub async fn add_account(&self, account: &NewAccount) -> Result<Account> {
        let username = account.username.trim();
        if username.is_empty() {
            return Err(Error::BadRequest("username must not be empty".to_string()));
        }
        if account.password.is_empty() {
            return Err(Error::BadRequest("password must not be empty".to_string()));
        }
        if self.find_account(username).await?.is_some() {
            return Err(Error::BadRequest(format!("account '{username}' already exists")));
        }

        let created_at = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO accounts (username, password_hash, locked, moderator, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(username)
        .bind(hash_password(&account.password))
        .bind(account.locked)
        .bind(account.moderator)
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(Account {
            id: result.last_insert_rowid(),
            username: username.to_string(),
            locked: account.locked,
            moderator: account.moderator,
            created_at,
        })
    }

    /// List all accounts
    pub async fn list_accounts(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query(
            "SELECT id, username, locked, moderator, created_at FROM accounts ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(account_from_row).collect())
    }

    /// Look up an account by name, ignoring case
    pub async fn find_account(&self, username: &str) -> Result<Option<Account>> {
        let row = sqlx::query(
            "SELECT id, username, locked, moderator, created_at FROM accounts WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(account_from_row))
    }

    /// Apply a partial update; returns the updated account
    pub async fn update_account(&self, id: i64, update: &AccountUpdate) -> Result<Option<Account>> {
        if let Some(password) = &update.password {
            if password.is_empty() {
                return Err(Error::BadRequest("password must not be empty".to_string()));
            }
            sqlx::query("UPDATE accounts SET password_hash = ? WHERE id = ?")
                .bind(hash_password(password))
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        if let Some(locked) = update.locked {
            sqlx::query("UPDATE accounts SET locked = ? WHERE id = ?")
                .bind(locked)
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        if let Some(moderator) = update.moderator {
            sqlx::query("UPDATE accounts SET moderator = ? WHERE id = ?")
                .bind(moderator)
                .bind(id)
                .execute(&self.pool)
                .await?;
        }

        let row = sqlx::query(
            "SELECT id, username, locked, moderator, created_at FROM accounts WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(account_from_row))
    }

    /// Delete an account
    pub async fn delete_account(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Check login credentials for a user name
    pub async fn check_login(&self, username: &str, password: Option<&str>) -> Result<AccountCheck> {
        let row = sqlx::query(
            r#"
            SELECT id, username, password_hash, locked, moderator, created_at
            FROM accounts WHERE username = ?
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(AccountCheck::NoAccount);
        };
        let account = account_from_row(&row);
        let hash: String = row.get("password_hash");

        match password {
            Some(password) if verify_password(password, &hash) => {
                if account.locked {
                    Ok(AccountCheck::Locked)
                } else {
                    Ok(AccountCheck::Ok(account))
                }
            }
            _ => Ok(AccountCheck::BadPassword),
        }
    }
}

fn account_from_row(row: &sqlx::sqlite::SqliteRow) -> Account {
    let created_at: String = row.get("created_at");
    Account {
        id: row.get("id"),
        username: row.get("username"),
        locked: row.get("locked"),
        moderator: row.get("moderator"),
        created_at: parse_time(&created_at).unwrap_or_else(Utc::now),
    }
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    to_hex(&hasher.finalize())
}

/// Hash a password with a fresh random salt
#[must_use]
pub fn hash_password(password: &str) -> String {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    let salt = to_hex(&salt);
    format!("sha256;{};{}", salt, digest(&salt, password))
}

/// Check a password against a stored hash
#[must_use]
pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.splitn(3, ';');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("sha256"), Some(salt), Some(expected)) => {
            let actual = digest(salt, password);
            actual.as_bytes().ct_eq(expected.as_bytes()).into()
        }
        _ => false,
    }
}
