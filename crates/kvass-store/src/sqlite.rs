//! `SQLite` persistence layer.

use crate::store::{ensure_key, Store, StoreError};
use kvass_core::{apply, Entry, NodeState, ProcessId};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{
    params, Connection, OptionalExtension, Result as SqliteResult, Row, Transaction,
    TransactionBehavior,
};
use std::path::Path;

/// Schema revision produced by the migrations below.
pub const SCHEMA_VERSION: u32 = 2;

const BASE_SCHEMA: &str = r"
    -- One live row per key
    CREATE TABLE IF NOT EXISTS entries (
        key TEXT PRIMARY KEY NOT NULL,
        value BLOB NOT NULL,
        timestamp INTEGER NOT NULL,
        pid INTEGER NOT NULL,
        counter INTEGER NOT NULL,
        url_token TEXT NOT NULL DEFAULT ''
    );

    -- Singleton node state blob
    CREATE TABLE IF NOT EXISTS state (
        id INTEGER PRIMARY KEY CHECK (id = 0),
        blob TEXT NOT NULL
    );
";

/// Forward-only migrations, applied in order above the stored revision.
const MIGRATIONS: &[(u32, &str)] = &[
    (
        1,
        "ALTER TABLE entries ADD COLUMN needs_push INTEGER NOT NULL DEFAULT 1;",
    ),
    (
        2,
        r"
        CREATE INDEX IF NOT EXISTS idx_entries_counter ON entries(counter);
        CREATE INDEX IF NOT EXISTS idx_entries_url_token ON entries(url_token);
        ",
    ),
];

const ENTRY_COLUMNS: &str = "key, value, timestamp, pid, counter, url_token, needs_push";

struct Inner {
    conn: Connection,
    state: NodeState,
}

/// `SQLite`-backed replica store.
///
/// Owns its database file exclusively; the node state is cached in memory
/// and only replaced after the transaction that persists it has committed.
pub struct SqliteStore {
    inner: Mutex<Inner>,
}

impl SqliteStore {
    /// Open or create a replica database.
    ///
    /// A new database gets a freshly generated node state; an existing one
    /// reloads its state and is migrated to [`SCHEMA_VERSION`].
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened, read, or migrated.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        tracing::debug!(path = %path.display(), "Opened replica database");
        Self::init(conn)
    }

    /// Create an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be created.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(BASE_SCHEMA)?;

        let mut state = load_or_create_state(&mut conn)?;
        migrate(&mut conn, &mut state)?;

        tracing::debug!(
            process_id = state.process_id,
            counter = state.counter,
            schema_version = state.schema_version,
            "Replica state loaded"
        );

        Ok(Self {
            inner: Mutex::new(Inner { conn, state }),
        })
    }
}

impl Store for SqliteStore {
    fn mutate(&self, incoming: Entry) -> Result<Entry, StoreError> {
        ensure_key(&incoming.key)?;

        let mut inner = self.inner.lock();
        let Inner { conn, state } = &mut *inner;

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current = select_entry(&tx, &incoming.key)?;

        let mut next = state.clone();
        let stored = apply(&mut next, current, incoming)?;

        upsert_entry(&tx, &stored)?;
        write_state(&tx, &next)?;
        tx.commit()?;

        *state = next;

        tracing::trace!(key = %stored.key, counter = stored.counter, "Entry stored");
        Ok(stored)
    }

    fn get(&self, key: &str) -> Result<Option<Entry>, StoreError> {
        let inner = self.inner.lock();
        Ok(select_entry(&inner.conn, key)?)
    }

    fn keys_after(&self, after: Option<&str>, limit: usize) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock();
        let mut stmt = inner.conn.prepare(
            r"
            SELECT key FROM entries
            WHERE length(value) != 0 AND key > ?1
            ORDER BY key ASC
            LIMIT ?2
            ",
        )?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let keys = stmt
            .query_map(params![after.unwrap_or(""), limit], |row| row.get(0))?
            .collect::<SqliteResult<Vec<String>>>()?;

        Ok(keys)
    }

    fn updates_since(&self, counter: u64, exclude: ProcessId) -> Result<Vec<Entry>, StoreError> {
        // No stored row can reach a bookmark past the integer range
        let Ok(since) = i64::try_from(counter) else {
            return Ok(Vec::new());
        };

        let inner = self.inner.lock();
        let mut stmt = inner.conn.prepare(&format!(
            r"
            SELECT {ENTRY_COLUMNS} FROM entries
            WHERE counter >= ?1 AND pid != ?2
            ORDER BY counter ASC
            "
        ))?;

        let entries = stmt
            .query_map(params![since, i64::from(exclude)], row_to_entry)?
            .collect::<SqliteResult<Vec<Entry>>>()?;

        Ok(entries)
    }

    fn pending_updates(&self) -> Result<Vec<Entry>, StoreError> {
        let inner = self.inner.lock();
        let mut stmt = inner.conn.prepare(&format!(
            r"
            SELECT {ENTRY_COLUMNS} FROM entries
            WHERE needs_push = 1
            ORDER BY counter ASC
            "
        ))?;

        let entries = stmt
            .query_map([], row_to_entry)?
            .collect::<SqliteResult<Vec<Entry>>>()?;

        Ok(entries)
    }

    fn mark_pushed(&self, delivered: &[Entry]) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock();
        let tx = inner.conn.transaction()?;

        let mut cleared = 0;
        {
            let mut stmt =
                tx.prepare("UPDATE entries SET needs_push = 0 WHERE key = ?1 AND counter = ?2")?;
            for entry in delivered {
                cleared += stmt.execute(params![entry.key, to_i64(entry.counter)?])?;
            }
        }
        tx.commit()?;

        Ok(cleared)
    }

    fn entry_by_token(&self, token: &str) -> Result<Option<Entry>, StoreError> {
        if token.is_empty() {
            return Ok(None);
        }

        let inner = self.inner.lock();
        let entry = inner
            .conn
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE url_token = ?1"),
                [token],
                row_to_entry,
            )
            .optional()?;

        Ok(entry)
    }

    fn state(&self) -> NodeState {
        self.inner.lock().state.clone()
    }

    fn update_state<F>(&self, change: F) -> Result<NodeState, StoreError>
    where
        F: FnOnce(&mut NodeState),
    {
        let mut inner = self.inner.lock();
        let Inner { conn, state } = &mut *inner;

        let mut next = state.clone();
        change(&mut next);

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        write_state(&tx, &next)?;
        tx.commit()?;

        *state = next.clone();
        Ok(next)
    }
}

fn load_or_create_state(conn: &mut Connection) -> Result<NodeState, StoreError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let blob: Option<String> = tx
        .query_row("SELECT blob FROM state WHERE id = 0", [], |row| row.get(0))
        .optional()?;

    let state = if let Some(blob) = blob {
        NodeState::from_json(&blob)?
    } else {
        let state = NodeState::generate();
        write_state(&tx, &state)?;
        tracing::info!(process_id = state.process_id, "Initialized new replica");
        state
    };

    tx.commit()?;
    Ok(state)
}

fn migrate(conn: &mut Connection, state: &mut NodeState) -> Result<(), StoreError> {
    for &(version, sql) in MIGRATIONS {
        if version <= state.schema_version {
            continue;
        }

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute_batch(sql)?;

        let mut next = state.clone();
        next.schema_version = version;
        write_state(&tx, &next)?;
        tx.commit()?;

        *state = next;
        tracing::info!(version, "Applied schema migration");
    }
    Ok(())
}

fn select_entry(conn: &Connection, key: &str) -> SqliteResult<Option<Entry>> {
    conn.query_row(
        &format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE key = ?1"),
        [key],
        row_to_entry,
    )
    .optional()
}

fn upsert_entry(tx: &Transaction<'_>, entry: &Entry) -> SqliteResult<()> {
    tx.execute(
        &format!(
            r"
            INSERT OR REPLACE INTO entries ({ENTRY_COLUMNS})
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "
        ),
        params![
            entry.key,
            entry.value,
            entry.timestamp_micros,
            i64::from(entry.process_id),
            to_i64(entry.counter)?,
            entry.url_token,
            entry.needs_push,
        ],
    )?;
    Ok(())
}

fn write_state(tx: &Transaction<'_>, state: &NodeState) -> Result<(), StoreError> {
    tx.execute(
        "INSERT OR REPLACE INTO state (id, blob) VALUES (0, ?1)",
        [state.to_json()?],
    )?;
    Ok(())
}

fn row_to_entry(row: &Row<'_>) -> SqliteResult<Entry> {
    let pid: i64 = row.get(3)?;
    let counter: i64 = row.get(4)?;

    Ok(Entry {
        key: row.get(0)?,
        value: row.get(1)?,
        timestamp_micros: row.get(2)?,
        process_id: ProcessId::try_from(pid)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Integer, Box::new(e)))?,
        counter: u64::try_from(counter)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Integer, Box::new(e)))?,
        url_token: row.get(5)?,
        needs_push: row.get(6)?,
    })
}

fn to_i64(value: u64) -> SqliteResult<i64> {
    i64::try_from(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}
