use std::fs;
use std::path::Path;
use std::time::Duration;

use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension};

use crate::chain::Chain;
use crate::store::{ChainRequest, DaemonState, StateStore, StoreError};

/// Database file inside the state directory
pub static DB_FILE: &str = "jatko.db";

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(state_dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(state_dir).map_err(|source| StoreError::Directory { path: state_dir.to_path_buf(), source })?;
        let path = state_dir.join(DB_FILE);
        if !path.exists() {
            info!("Creating new database {}", path.display())
        }
        let conn = Connection::open(&path)?;
        // the CLI reads while the daemon writes
        conn.busy_timeout(Duration::from_secs(5))?;

        static SCHEMA: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/db/schema.sql"));
        conn.execute_batch(SCHEMA)?;

        Ok(SqliteStore { conn })
    }
}

impl StateStore for SqliteStore {
    fn load(&self) -> Result<DaemonState, StoreError> {
        let mut stmt = self.conn.prepare("SELECT id, record FROM chain ORDER BY id")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

        let mut state = DaemonState::default();
        for row in rows {
            let (id, record) = row?;
            let chain: Chain = serde_json::from_str(&record).map_err(|err| StoreError::Corruption(format!("chain {id}: {err}")))?;
            state.chains.insert(id, chain);
        }
        state.check()?;

        debug!("Loaded {} chains", state.chains.len());
        Ok(state)
    }

    fn save(&mut self, state: &DaemonState) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        {
            let mut upsert = tx.prepare(
                "INSERT INTO chain (id, phase, record, updated_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET phase = excluded.phase, record = excluded.record, updated_at = excluded.updated_at",
            )?;
            for chain in state.chains.values() {
                let record = serde_json::to_string(chain)?;
                upsert.execute(params![chain.id, chain.phase.to_string(), record, chain.updated_at.to_rfc3339()])?;
            }
        }
        tx.execute("DELETE FROM chain_request WHERE id IN (SELECT id FROM chain)", [])?;
        tx.commit()?;

        debug!("Saved {} chains", state.chains.len());
        Ok(())
    }

    fn enqueue(&mut self, request: &ChainRequest) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        let taken = tx
            .query_row(
                "SELECT id FROM chain WHERE id = ?1 UNION SELECT id FROM chain_request WHERE id = ?1",
                [&request.id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        if taken.is_some() {
            return Err(StoreError::DuplicateChain(request.id.clone()));
        }

        let body = serde_json::to_string(request)?;
        tx.execute(
            "INSERT INTO chain_request (id, request, requested_at) VALUES (?1, ?2, ?3)",
            params![request.id, body, request.requested_at.to_rfc3339()],
        )?;
        tx.commit()?;

        info!("Queued chain {}", request.id);
        Ok(())
    }

    fn pending_requests(&self) -> Result<Vec<ChainRequest>, StoreError> {
        let mut stmt = self.conn.prepare("SELECT id, request FROM chain_request ORDER BY requested_at, id")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

        let mut requests = Vec::new();
        for row in rows {
            let (id, body) = row?;
            let request = serde_json::from_str(&body).map_err(|err| StoreError::Corruption(format!("request {id}: {err}")))?;
            requests.push(request);
        }
        Ok(requests)
    }
}
