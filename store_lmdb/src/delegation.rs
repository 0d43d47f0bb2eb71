//! LMDB implementation of DelegationStore.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use heed::types::{Bytes, Unit};
use heed::{Database, Env, RoTxn};
use tracing::debug;

use tezdel_store::{is_valid_year, DelegationStore, StoreError};
use tezdel_types::Delegation;

use crate::environment::{open_env, MAX_DBS};
use crate::LmdbError;

pub(crate) const DELEGATIONS_DB: &str = "delegations";
pub(crate) const TIMESTAMP_DB: &str = "by_timestamp";

/// Separates the timestamp from the id in index keys. Never appears in a
/// wire timestamp.
const KEY_SEPARATOR: u8 = 0;

pub struct LmdbDelegationStore {
    pub(crate) env: Env,
    /// id -> bincode(Delegation)
    pub(crate) delegations_db: Database<Bytes, Bytes>,
    /// timestamp \0 id -> ()
    pub(crate) timestamp_db: Database<Bytes, Unit>,
    closed: AtomicBool,
}

impl LmdbDelegationStore {
    /// Open the store at `path`, creating the environment and databases on
    /// first use.
    pub fn open(path: &Path, map_size: usize) -> Result<Self, LmdbError> {
        let env = open_env(path, MAX_DBS, map_size)?;
        let mut wtxn = env.write_txn()?;
        let delegations_db = env.create_database(&mut wtxn, Some(DELEGATIONS_DB))?;
        let timestamp_db = env.create_database(&mut wtxn, Some(TIMESTAMP_DB))?;
        wtxn.commit()?;
        debug!(path = %path.display(), "opened delegation store");
        Ok(Self {
            env,
            delegations_db,
            timestamp_db,
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn load(&self, rtxn: &RoTxn, id: &[u8]) -> Result<Delegation, StoreError> {
        let bytes = self
            .delegations_db
            .get(rtxn, id)
            .map_err(LmdbError::from)?
            .ok_or_else(|| {
                LmdbError::CorruptIndex(format!(
                    "index references missing id {}",
                    String::from_utf8_lossy(id)
                ))
            })?;
        decode(bytes)
    }
}

/// `timestamp \0 len(id) as u16 BE id`. The length prefix orders ids of the
/// same second by length first, which is numeric order for decimal ids.
fn index_key(d: &Delegation) -> Vec<u8> {
    let id = d.id.as_bytes();
    let mut key = Vec::with_capacity(d.timestamp.len() + 3 + id.len());
    key.extend_from_slice(d.timestamp.as_bytes());
    key.push(KEY_SEPARATOR);
    key.extend_from_slice(&(id.len() as u16).to_be_bytes());
    key.extend_from_slice(id);
    key
}

/// The id half of an index key.
pub(crate) fn id_from_index_key(key: &[u8]) -> Result<&[u8], LmdbError> {
    let corrupt = |what: &str| {
        LmdbError::CorruptIndex(format!("{what} in {}", String::from_utf8_lossy(key)))
    };
    let pos = key
        .iter()
        .position(|&b| b == KEY_SEPARATOR)
        .ok_or_else(|| corrupt("missing separator"))?;
    let rest = &key[pos + 1..];
    if rest.len() < 2 {
        return Err(corrupt("missing id length"));
    }
    let (len, id) = rest.split_at(2);
    if usize::from(u16::from_be_bytes([len[0], len[1]])) != id.len() {
        return Err(corrupt("id length mismatch"));
    }
    Ok(id)
}

fn decode(bytes: &[u8]) -> Result<Delegation, StoreError> {
    bincode::deserialize(bytes)
        .map_err(|e| LmdbError::Serialization(e.to_string()).into())
}

impl DelegationStore for LmdbDelegationStore {
    fn insert(&self, delegations: &[Delegation]) -> Result<usize, StoreError> {
        self.ensure_open()?;
        if delegations.is_empty() {
            return Ok(0);
        }

        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        let mut inserted = 0;
        for d in delegations {
            let exists = self
                .delegations_db
                .get(&wtxn, d.id.as_bytes())
                .map_err(LmdbError::from)?
                .is_some();
            if exists {
                continue;
            }
            let bytes =
                bincode::serialize(d).map_err(|e| LmdbError::Serialization(e.to_string()))?;
            self.delegations_db
                .put(&mut wtxn, d.id.as_bytes(), &bytes)
                .map_err(LmdbError::from)?;
            self.timestamp_db
                .put(&mut wtxn, &index_key(d), &())
                .map_err(LmdbError::from)?;
            inserted += 1;
        }
        wtxn.commit().map_err(LmdbError::from)?;

        debug!(
            received = delegations.len(),
            inserted, "inserted delegations"
        );
        Ok(inserted)
    }

    fn last_delegation(&self) -> Result<Option<Delegation>, StoreError> {
        self.ensure_open()?;
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let Some((key, ())) = self.timestamp_db.last(&rtxn).map_err(LmdbError::from)? else {
            return Ok(None);
        };
        let id = id_from_index_key(key)?;
        self.load(&rtxn, id).map(Some)
    }

    fn get_by_year(&self, year: &str) -> Result<Vec<Delegation>, StoreError> {
        self.ensure_open()?;
        if !is_valid_year(year) {
            return Err(StoreError::InvalidQuery(format!(
                "year must be four digits, got {year:?}"
            )));
        }

        let prefix = format!("{year}-");
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let iter = self
            .timestamp_db
            .rev_prefix_iter(&rtxn, prefix.as_bytes())
            .map_err(LmdbError::from)?;

        let mut delegations = Vec::new();
        for entry in iter {
            let (key, ()) = entry.map_err(LmdbError::from)?;
            let id = id_from_index_key(key)?;
            delegations.push(self.load(&rtxn, id)?);
        }
        Ok(delegations)
    }

    fn empty(&self) -> Result<(), StoreError> {
        self.ensure_open()?;
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        self.delegations_db
            .clear(&mut wtxn)
            .map_err(LmdbError::from)?;
        self.timestamp_db.clear(&mut wtxn).map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(())
    }

    fn count(&self) -> Result<u64, StoreError> {
        self.ensure_open()?;
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let count = self.delegations_db.len(&rtxn).map_err(LmdbError::from)?;
        Ok(count)
    }

    fn close(&self) -> Result<(), StoreError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(StoreError::Closed);
        }
        self.env.force_sync().map_err(LmdbError::from)?;
        debug!("closed delegation store");
        Ok(())
    }
}
