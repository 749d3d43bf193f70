//! SQLite persistence layer.
//!
//! Values are stored as JSON text keyed by their `0x` hex identifiers, so
//! the database stays readable with the stock `sqlite3` shell.

use log::debug;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use quorum_core::{
    Address, Configuration, Context, GenericTree, Hash32, LeafSignature, SapientSignature,
    SignerSignature,
};

use crate::{CounterfactualWallet, StateError, StateStore, StoredPayload};

/// Plain signatures are stored with an empty image hash column.
const NO_IMAGE_HASH: &str = "";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run migrations.
    pub fn open(path: &Path) -> Result<Self, StateError> {
        let conn = Connection::open(path)?;

        // WAL mode for better concurrent read performance
        conn.pragma_update(None, "journal_mode", "WAL")?;
        migrate(&conn)?;
        debug!("Opened state database at {}", path.display());

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// A private database that lives as long as the store.
    pub fn open_in_memory() -> Result<Self, StateError> {
        let conn = Connection::open_in_memory()?;
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StateError> {
        self.conn
            .lock()
            .map_err(|e| StateError::Poisoned(e.to_string()))
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        sql: &str,
        key: &str,
    ) -> Result<Option<T>, StateError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(sql)?;
        let value: Option<String> = stmt
            .query_row(params![key], |row| row.get(0))
            .optional()?;
        match value {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize>(&self, sql: &str, key: &str, value: &T) -> Result<(), StateError> {
        let json = serde_json::to_string(value)?;
        self.conn()?.execute(sql, params![key, json])?;
        Ok(())
    }

    fn put_signature(
        &self,
        digest: &Hash32,
        signer: &Address,
        image_hash: Option<&Hash32>,
        signature: &LeafSignature,
    ) -> Result<(), StateError> {
        let json = serde_json::to_string(signature)?;
        let image_hash = image_hash
            .map(|h| h.to_string())
            .unwrap_or_else(|| NO_IMAGE_HASH.to_string());
        self.conn()?.execute(
            "INSERT INTO signatures (digest, signer, image_hash, value, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(digest, signer, image_hash) DO UPDATE SET value = excluded.value",
            params![
                digest.to_string(),
                signer.to_string(),
                image_hash,
                json,
                unix_now()
            ],
        )?;
        Ok(())
    }

    fn get_signature(
        &self,
        digest: &Hash32,
        signer: &Address,
        image_hash: Option<&Hash32>,
    ) -> Result<Option<LeafSignature>, StateError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT value FROM signatures WHERE digest = ?1 AND signer = ?2 AND image_hash = ?3",
        )?;
        let image_hash = image_hash
            .map(|h| h.to_string())
            .unwrap_or_else(|| NO_IMAGE_HASH.to_string());
        let value: Option<String> = stmt
            .query_row(
                params![digest.to_string(), signer.to_string(), image_hash],
                |row| row.get(0),
            )
            .optional()?;
        match value {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Create tables. Safe to run on every open.
fn migrate(conn: &Connection) -> Result<(), StateError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS configs (
            image_hash TEXT PRIMARY KEY,
            value      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS wallets (
            address TEXT PRIMARY KEY,
            value   TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS payloads (
            digest TEXT PRIMARY KEY,
            value  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS signatures (
            digest     TEXT NOT NULL,
            signer     TEXT NOT NULL,
            image_hash TEXT NOT NULL DEFAULT '',
            value      TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (digest, signer, image_hash)
        );

        CREATE TABLE IF NOT EXISTS trees (
            root_hash TEXT PRIMARY KEY,
            value     TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

impl StateStore for SqliteStore {
    fn load_config(&self, image_hash: &Hash32) -> Result<Option<Configuration>, StateError> {
        self.get_json(
            "SELECT value FROM configs WHERE image_hash = ?1",
            &image_hash.to_string(),
        )
    }

    fn save_config(&self, image_hash: &Hash32, config: &Configuration) -> Result<(), StateError> {
        self.put_json(
            "INSERT INTO configs (image_hash, value) VALUES (?1, ?2)
             ON CONFLICT(image_hash) DO UPDATE SET value = excluded.value",
            &image_hash.to_string(),
            config,
        )
    }

    fn load_counterfactual_wallet(
        &self,
        wallet: &Address,
    ) -> Result<Option<CounterfactualWallet>, StateError> {
        self.get_json(
            "SELECT value FROM wallets WHERE address = ?1",
            &wallet.to_string(),
        )
    }

    fn save_counterfactual_wallet(
        &self,
        wallet: &Address,
        image_hash: &Hash32,
        context: &Context,
    ) -> Result<(), StateError> {
        self.put_json(
            "INSERT INTO wallets (address, value) VALUES (?1, ?2)
             ON CONFLICT(address) DO UPDATE SET value = excluded.value",
            &wallet.to_string(),
            &CounterfactualWallet {
                image_hash: *image_hash,
                context: context.clone(),
            },
        )
    }

    fn load_payload_of_digest(&self, digest: &Hash32) -> Result<Option<StoredPayload>, StateError> {
        self.get_json(
            "SELECT value FROM payloads WHERE digest = ?1",
            &digest.to_string(),
        )
    }

    fn save_payload_of_digest(
        &self,
        digest: &Hash32,
        payload: &StoredPayload,
    ) -> Result<(), StateError> {
        self.put_json(
            "INSERT INTO payloads (digest, value) VALUES (?1, ?2)
             ON CONFLICT(digest) DO UPDATE SET value = excluded.value",
            &digest.to_string(),
            payload,
        )
    }

    fn load_signature_of_digest(
        &self,
        signer: &Address,
        digest: &Hash32,
    ) -> Result<Option<SignerSignature>, StateError> {
        Ok(match self.get_signature(digest, signer, None)? {
            Some(LeafSignature::Signer { signature, .. }) => Some(signature),
            _ => None,
        })
    }

    fn save_signature_of_digest(
        &self,
        signer: &Address,
        digest: &Hash32,
        signature: &SignerSignature,
    ) -> Result<(), StateError> {
        self.put_signature(
            digest,
            signer,
            None,
            &LeafSignature::Signer {
                address: *signer,
                signature: signature.clone(),
            },
        )
    }

    fn load_sapient_signature_of_digest(
        &self,
        signer: &Address,
        image_hash: &Hash32,
        digest: &Hash32,
    ) -> Result<Option<SapientSignature>, StateError> {
        Ok(match self.get_signature(digest, signer, Some(image_hash))? {
            Some(LeafSignature::Sapient { signature, .. }) => Some(signature),
            _ => None,
        })
    }

    fn save_sapient_signature_of_digest(
        &self,
        signer: &Address,
        image_hash: &Hash32,
        digest: &Hash32,
        signature: &SapientSignature,
    ) -> Result<(), StateError> {
        let mut signature = signature.clone();
        signature.address = *signer;
        self.put_signature(
            digest,
            signer,
            Some(image_hash),
            &LeafSignature::Sapient {
                image_hash: *image_hash,
                signature,
            },
        )
    }

    fn load_signatures_of_digest(&self, digest: &Hash32) -> Result<Vec<LeafSignature>, StateError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare_cached("SELECT value FROM signatures WHERE digest = ?1 ORDER BY created_at, rowid")?;
        let rows = stmt.query_map(params![digest.to_string()], |row| row.get::<_, String>(0))?;

        let mut signatures = Vec::new();
        for json in rows {
            signatures.push(serde_json::from_str(&json?)?);
        }
        Ok(signatures)
    }

    fn load_tree(&self, root_hash: &Hash32) -> Result<Option<GenericTree>, StateError> {
        self.get_json(
            "SELECT value FROM trees WHERE root_hash = ?1",
            &root_hash.to_string(),
        )
    }

    fn save_tree(&self, root_hash: &Hash32, tree: &GenericTree) -> Result<(), StateError> {
        self.put_json(
            "INSERT INTO trees (root_hash, value) VALUES (?1, ?2)
             ON CONFLICT(root_hash) DO UPDATE SET value = excluded.value",
            &root_hash.to_string(),
            tree,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signature_columns(conn: &Connection) -> Vec<(String, bool)> {
        let mut stmt = conn.prepare("PRAGMA table_info(signatures)").unwrap();
        stmt.query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, i64>(3)? == 1)))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn test_schema_is_created_whole() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        let columns = signature_columns(&conn);
        assert!(columns.contains(&("created_at".to_string(), true)));

        // Running again changes nothing
        migrate(&conn).unwrap();
        assert_eq!(signature_columns(&conn), columns);
    }

    #[test]
    fn test_signatures_load_in_insertion_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        let digest = Hash32([9; 32]);
        let signers: Vec<Address> = [3u8, 1, 2].into_iter().map(|b| Address([b; 20])).collect();
        for signer in &signers {
            store
                .save_signature_of_digest(
                    signer,
                    &digest,
                    &SignerSignature::Erc1271 {
                        address: *signer,
                        data: vec![1],
                    },
                )
                .unwrap();
        }
        let loaded: Vec<Address> = store
            .load_signatures_of_digest(&digest)
            .unwrap()
            .iter()
            .map(|s| s.address())
            .collect();
        assert_eq!(loaded, signers);
    }
}
