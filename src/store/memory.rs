use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::chain::Chain;
use crate::store::{ChainRequest, DaemonState, StateStore, StoreError};

#[derive(Debug, Default)]
struct Inner {
    /// Serialised like the database rows, so a snapshot never shares memory with the daemon
    chains: BTreeMap<String, String>,
    requests: Vec<ChainRequest>,
    saves: usize,
}

/// Keeps state in memory, clones share the same contents
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Start from a previously saved state, as after a daemon restart
    pub fn from_snapshot(state: &DaemonState) -> Result<Self, StoreError> {
        let mut store = MemoryStore::new();
        store.save(state)?;
        store.lock().saves = 0;
        Ok(store)
    }

    pub fn snapshot(&self) -> Result<DaemonState, StoreError> {
        self.load()
    }

    /// Number of completed saves
    pub fn saves(&self) -> usize {
        self.lock().saves
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StateStore for MemoryStore {
    fn load(&self) -> Result<DaemonState, StoreError> {
        let inner = self.lock();
        let mut state = DaemonState::default();
        for (id, record) in &inner.chains {
            let chain: Chain = serde_json::from_str(record).map_err(|err| StoreError::Corruption(format!("chain {id}: {err}")))?;
            state.chains.insert(id.clone(), chain);
        }
        state.check()?;
        Ok(state)
    }

    fn save(&mut self, state: &DaemonState) -> Result<(), StoreError> {
        let mut rows = BTreeMap::new();
        for (id, chain) in &state.chains {
            rows.insert(id.clone(), serde_json::to_string(chain)?);
        }

        let mut inner = self.lock();
        inner.chains.extend(rows);
        let chains = &inner.chains;
        let remaining: Vec<ChainRequest> = inner.requests.iter().filter(|request| !chains.contains_key(&request.id)).cloned().collect();
        inner.requests = remaining;
        inner.saves += 1;
        Ok(())
    }

    fn enqueue(&mut self, request: &ChainRequest) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if inner.chains.contains_key(&request.id) || inner.requests.iter().any(|queued| queued.id == request.id) {
            return Err(StoreError::DuplicateChain(request.id.clone()));
        }
        inner.requests.push(request.clone());
        Ok(())
    }

    fn pending_requests(&self) -> Result<Vec<ChainRequest>, StoreError> {
        let mut requests = self.lock().requests.clone();
        requests.sort_by(|a, b| a.requested_at.cmp(&b.requested_at).then_with(|| a.id.cmp(&b.id)));
        Ok(requests)
    }
}
