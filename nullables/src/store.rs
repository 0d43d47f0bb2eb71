//! Nullable store: thread-safe in-memory storage for testing.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tezdel_store::{is_valid_year, DelegationStore, StoreError};
use tezdel_types::Delegation;

/// An in-memory delegation store that records every insert call.
/// Thread-safe for use with tokio's multi-threaded runtime.
pub struct NullDelegationStore {
    by_id: Mutex<BTreeMap<String, Delegation>>,
    insert_calls: Mutex<Vec<Vec<Delegation>>>,
    fail_inserts: AtomicBool,
    fail_reads: AtomicBool,
    closed: AtomicBool,
}

impl NullDelegationStore {
    pub fn new() -> Self {
        Self {
            by_id: Mutex::new(BTreeMap::new()),
            insert_calls: Mutex::new(Vec::new()),
            fail_inserts: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// A store pre-populated with `delegations`. The seeding is not recorded
    /// as an insert call.
    pub fn with(delegations: impl IntoIterator<Item = Delegation>) -> Self {
        let store = Self::new();
        {
            let mut by_id = store.by_id.lock().unwrap();
            for d in delegations {
                by_id.insert(d.id.clone(), d);
            }
        }
        store
    }

    /// Make every subsequent insert fail with a backend error.
    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent read fail with a backend error.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Every slice passed to `insert`, in call order (including failed calls).
    pub fn insert_calls(&self) -> Vec<Vec<Delegation>> {
        self.insert_calls.lock().unwrap().clone()
    }

    /// All stored delegations ordered by id.
    pub fn all(&self) -> Vec<Delegation> {
        self.by_id.lock().unwrap().values().cloned().collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check(&self, fail: &AtomicBool) -> Result<(), StoreError> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        if fail.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("null store told to fail".into()));
        }
        Ok(())
    }
}

/// Timestamp, then id in numeric order for decimal ids.
fn order_key(d: &Delegation) -> (&str, usize, &str) {
    (&d.timestamp, d.id.len(), &d.id)
}

impl Default for NullDelegationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DelegationStore for NullDelegationStore {
    fn insert(&self, delegations: &[Delegation]) -> Result<usize, StoreError> {
        self.insert_calls.lock().unwrap().push(delegations.to_vec());
        self.check(&self.fail_inserts)?;
        let mut by_id = self.by_id.lock().unwrap();
        let mut inserted = 0;
        for d in delegations {
            if !by_id.contains_key(&d.id) {
                by_id.insert(d.id.clone(), d.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    fn last_delegation(&self) -> Result<Option<Delegation>, StoreError> {
        self.check(&self.fail_reads)?;
        Ok(self
            .by_id
            .lock()
            .unwrap()
            .values()
            .max_by(|a, b| order_key(a).cmp(&order_key(b)))
            .cloned())
    }

    fn get_by_year(&self, year: &str) -> Result<Vec<Delegation>, StoreError> {
        self.check(&self.fail_reads)?;
        if !is_valid_year(year) {
            return Err(StoreError::InvalidQuery(format!(
                "year must be four digits, got {year:?}"
            )));
        }
        let prefix = format!("{year}-");
        let mut matching: Vec<Delegation> = self
            .by_id
            .lock()
            .unwrap()
            .values()
            .filter(|d| d.timestamp.starts_with(&prefix))
            .cloned()
            .collect();
        matching.sort_by(|a, b| order_key(b).cmp(&order_key(a)));
        Ok(matching)
    }

    fn empty(&self) -> Result<(), StoreError> {
        self.check(&self.fail_inserts)?;
        self.by_id.lock().unwrap().clear();
        Ok(())
    }

    fn count(&self) -> Result<u64, StoreError> {
        self.check(&self.fail_reads)?;
        Ok(self.by_id.lock().unwrap().len() as u64)
    }

    fn close(&self) -> Result<(), StoreError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}
