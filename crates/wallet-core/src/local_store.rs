//! SQLite-backed local store for wallet records and identity mappings.
//!
//! This is the fast, always-available tier. Every call is synchronous and
//! completes (or fails) before returning. One connection guarded by a mutex
//! serializes writers, so concurrent writes to the same key resolve in
//! program order.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use tracing::debug;

use crate::address::WalletAddress;
use crate::error::{Result, WalletError};
use crate::records::{IdentifierKind, IdentityMapping, WalletRecord};

/// Current schema version
const SCHEMA_VERSION: i32 = 1;

const WALLET_COLUMNS: &str = "address, plaintext_secret, encrypted_secret, iv, password_hash, \
     email, username, created_at, updated_at";

pub struct LocalStore {
    conn: Mutex<Connection>,
}

impl LocalStore {
    /// Open or create the database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| WalletError::LocalIo {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;

        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    /// Open in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            [],
        )?;

        let current_version: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?;

        if current_version < 1 {
            Self::migrate_v1(&conn)?;
        }
        Ok(())
    }

    /// Schema version 1 - wallets and identity mappings
    fn migrate_v1(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS wallets (
                address TEXT PRIMARY KEY,
                plaintext_secret TEXT,
                encrypted_secret TEXT,
                iv TEXT,
                password_hash TEXT,
                email TEXT,
                username TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS identity_mappings (
                identifier TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                address TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_identity_mappings_address
                ON identity_mappings(address);
            "#,
        )?;
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            params![SCHEMA_VERSION],
        )?;
        Ok(())
    }

    // ========================================================================
    // Wallets
    // ========================================================================

    pub fn put_wallet(&self, record: &WalletRecord) -> Result<()> {
        record.validate()?;
        let conn = self.conn.lock();
        Self::upsert_wallet(&conn, record)?;
        debug!(address = %record.address, "wallet written locally");
        Ok(())
    }

    pub fn get_wallet(&self, address: &WalletAddress) -> Result<Option<WalletRecord>> {
        let conn = self.conn.lock();
        Self::select_wallet(&conn, address)
    }

    /// Atomic read-modify-write of one wallet row.
    ///
    /// `f` sees the current row (if any) and returns the row to write, or
    /// `None` to leave it untouched. Returns what was written.
    pub fn update_wallet<F>(&self, address: &WalletAddress, f: F) -> Result<Option<WalletRecord>>
    where
        F: FnOnce(Option<WalletRecord>) -> Option<WalletRecord>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let current = Self::select_wallet(&tx, address)?;
        let next = f(current);
        if let Some(record) = &next {
            if record.address != *address {
                return Err(WalletError::Validation(format!(
                    "update for {address} produced a record for {}",
                    record.address
                )));
            }
            record.validate()?;
            Self::upsert_wallet(&tx, record)?;
        }
        tx.commit()?;
        Ok(next)
    }

    fn upsert_wallet(conn: &Connection, record: &WalletRecord) -> Result<()> {
        conn.execute(
            "INSERT INTO wallets (address, plaintext_secret, encrypted_secret, iv, password_hash,
                                  email, username, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(address) DO UPDATE SET
                plaintext_secret = excluded.plaintext_secret,
                encrypted_secret = excluded.encrypted_secret,
                iv = excluded.iv,
                password_hash = excluded.password_hash,
                email = excluded.email,
                username = excluded.username,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at",
            params![
                record.address.storage_key(),
                record.plaintext_secret,
                record.encrypted_secret,
                record.iv,
                record.password_hash,
                record.email,
                record.username,
                record.created_at.timestamp_millis(),
                record.updated_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    fn select_wallet(conn: &Connection, address: &WalletAddress) -> Result<Option<WalletRecord>> {
        conn.query_row(
            &format!("SELECT {WALLET_COLUMNS} FROM wallets WHERE address = ?1"),
            params![address.storage_key()],
            row_to_wallet,
        )
        .optional()
        .map_err(Into::into)
    }

    // ========================================================================
    // Identity mappings
    // ========================================================================

    /// Writes one mapping row, returning the row it replaced.
    pub fn put_mapping(&self, mapping: &IdentityMapping) -> Result<Option<IdentityMapping>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let previous = Self::select_mapping(&tx, &mapping.identifier)?;
        tx.execute(
            "INSERT OR REPLACE INTO identity_mappings (identifier, kind, address, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                mapping.identifier,
                mapping.kind.as_str(),
                mapping.address.storage_key(),
                mapping.created_at.timestamp_millis(),
            ],
        )?;
        tx.commit()?;
        Ok(previous)
    }

    /// `identifier` must already be normalized.
    pub fn get_mapping(&self, identifier: &str) -> Result<Option<IdentityMapping>> {
        let conn = self.conn.lock();
        Self::select_mapping(&conn, identifier)
    }

    pub fn mappings_for_address(&self, address: &WalletAddress) -> Result<Vec<IdentityMapping>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT identifier, kind, address, created_at
             FROM identity_mappings WHERE address = ?1 ORDER BY kind, identifier",
        )?;
        let rows = stmt
            .query_map(params![address.storage_key()], row_to_mapping)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn select_mapping(conn: &Connection, identifier: &str) -> Result<Option<IdentityMapping>> {
        conn.query_row(
            "SELECT identifier, kind, address, created_at
             FROM identity_mappings WHERE identifier = ?1",
            params![identifier],
            row_to_mapping,
        )
        .optional()
        .map_err(Into::into)
    }
}

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

fn column_address(row: &Row, idx: usize) -> rusqlite::Result<WalletAddress> {
    let raw: String = row.get(idx)?;
    WalletAddress::parse(&raw).map_err(|e| conversion_error(idx, e))
}

fn column_time(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let millis: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(millis)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, millis))
}

fn row_to_wallet(row: &Row) -> rusqlite::Result<WalletRecord> {
    Ok(WalletRecord {
        address: column_address(row, 0)?,
        plaintext_secret: row.get(1)?,
        encrypted_secret: row.get(2)?,
        iv: row.get(3)?,
        password_hash: row.get(4)?,
        email: row.get(5)?,
        username: row.get(6)?,
        created_at: column_time(row, 7)?,
        updated_at: column_time(row, 8)?,
    })
}

fn row_to_mapping(row: &Row) -> rusqlite::Result<IdentityMapping> {
    let identifier: String = row.get(0)?;
    let kind_raw: String = row.get(1)?;
    let kind =
        IdentifierKind::parse(&kind_raw).unwrap_or_else(|| IdentifierKind::infer(&identifier));
    Ok(IdentityMapping {
        identifier,
        kind,
        address: column_address(row, 2)?,
        created_at: column_time(row, 3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn addr(hex_digit: char) -> WalletAddress {
        WalletAddress::parse(&format!("0x{}", hex_digit.to_string().repeat(40))).unwrap()
    }

    #[test]
    fn wallet_roundtrip_preserves_every_field() {
        let store = LocalStore::open_in_memory().unwrap();
        let mut record = WalletRecord::new(addr('a')).with_encrypted_secret("c2VjcmV0", "aXY=");
        record.password_hash = Some("$argon2id$stub".into());
        record.email = Some("a@example.com".into());
        record.username = Some("alice".into());

        store.put_wallet(&record).unwrap();
        assert_eq!(store.get_wallet(&addr('a')).unwrap(), Some(record));
        assert_eq!(store.get_wallet(&addr('b')).unwrap(), None);
    }

    #[test]
    fn invalid_record_is_not_written() {
        let store = LocalStore::open_in_memory().unwrap();
        let mut record = WalletRecord::new(addr('a')).with_plaintext_secret("0x01");
        record.encrypted_secret = Some("AAAA".into());
        record.iv = Some("AAAA".into());
        assert!(store.put_wallet(&record).unwrap_err().is_validation());
        assert!(store.get_wallet(&addr('a')).unwrap().is_none());
    }

    #[test]
    fn update_wallet_sees_current_row() {
        let store = LocalStore::open_in_memory().unwrap();
        store
            .put_wallet(&WalletRecord::new(addr('a')).with_plaintext_secret("0x01"))
            .unwrap();

        let written = store
            .update_wallet(&addr('a'), |current| {
                let mut record = current.expect("row exists");
                record.username = Some("bob".into());
                Some(record)
            })
            .unwrap()
            .unwrap();
        assert_eq!(written.username.as_deref(), Some("bob"));
        assert_eq!(written.plaintext_secret.as_deref(), Some("0x01"));

        let untouched = store.update_wallet(&addr('a'), |_| None).unwrap();
        assert!(untouched.is_none());
        assert_eq!(
            store.get_wallet(&addr('a')).unwrap().unwrap().username.as_deref(),
            Some("bob")
        );
    }

    #[test]
    fn update_wallet_rejects_foreign_address() {
        let store = LocalStore::open_in_memory().unwrap();
        let err = store
            .update_wallet(&addr('a'), |_| Some(WalletRecord::new(addr('b'))))
            .unwrap_err();
        assert!(err.is_validation());
        assert!(store.get_wallet(&addr('b')).unwrap().is_none());
    }

    #[test]
    fn mapping_overwrite_returns_previous_row() {
        let store = LocalStore::open_in_memory().unwrap();
        let first = IdentityMapping::new("Alice", IdentifierKind::Username, addr('a')).unwrap();
        assert!(store.put_mapping(&first).unwrap().is_none());

        let second = IdentityMapping::new("alice", IdentifierKind::Username, addr('b')).unwrap();
        let previous = store.put_mapping(&second).unwrap().unwrap();
        assert_eq!(previous.address, addr('a'));
        assert_eq!(store.get_mapping("alice").unwrap().unwrap().address, addr('b'));
    }

    #[test]
    fn mappings_are_listed_per_address() {
        let store = LocalStore::open_in_memory().unwrap();
        for (identifier, kind, owner) in [
            ("alice", IdentifierKind::Username, addr('a')),
            ("a@example.com", IdentifierKind::Email, addr('a')),
            ("carol", IdentifierKind::Username, addr('c')),
        ] {
            let mapping = IdentityMapping::new(identifier, kind, owner).unwrap();
            store.put_mapping(&mapping).unwrap();
        }

        let rows = store.mappings_for_address(&addr('a')).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].kind, IdentifierKind::Email);
        assert_eq!(rows[1].identifier, "alice");
    }

    #[test]
    fn reopening_file_keeps_data_and_schema() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("wallet.db");
        {
            let store = LocalStore::open(&path).unwrap();
            store.put_wallet(&WalletRecord::new(addr('d'))).unwrap();
        }
        let store = LocalStore::open(&path).unwrap();
        assert!(store.get_wallet(&addr('d')).unwrap().is_some());
    }

    #[test]
    fn unusable_data_dir_is_a_local_store_error() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("occupied");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let err = match LocalStore::open(&blocker.join("wallet.db")) {
            Ok(_) => panic!("opened a store under a regular file"),
            Err(err) => err,
        };
        assert!(matches!(err, WalletError::LocalIo { .. }));
        assert!(err.is_local());
    }
}
