//! LMDB database integrity checks.
//!
//! Run on startup to detect a diverged timestamp index early, before the
//! synchronizers begin writing.

use std::path::Path;

use crate::delegation::{id_from_index_key, LmdbDelegationStore};
use crate::LmdbError;

/// Summary of an integrity check run.
#[derive(Debug)]
pub struct IntegrityReport {
    pub delegations: u64,
    pub index_entries: u64,
    pub errors: Vec<String>,
}

impl IntegrityReport {
    /// Returns `true` if no errors were detected.
    pub fn is_healthy(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Check that every timestamp index entry points at a stored delegation and
/// that both databases hold the same number of entries.
///
/// Dangling entries are recorded in the report rather than causing a hard
/// error.
pub fn check_integrity(store: &LmdbDelegationStore) -> Result<IntegrityReport, LmdbError> {
    let rtxn = store.env.read_txn()?;
    let mut report = IntegrityReport {
        delegations: store.delegations_db.len(&rtxn)?,
        index_entries: store.timestamp_db.len(&rtxn)?,
        errors: Vec::new(),
    };

    for entry in store.timestamp_db.iter(&rtxn)? {
        let (key, ()) = entry?;
        match id_from_index_key(key) {
            Ok(id) => {
                if store.delegations_db.get(&rtxn, id)?.is_none() {
                    report.errors.push(format!(
                        "index entry {} has no delegation",
                        String::from_utf8_lossy(key)
                    ));
                }
            }
            Err(e) => report.errors.push(e.to_string()),
        }
    }

    if report.delegations != report.index_entries {
        report.errors.push(format!(
            "{} delegations but {} index entries",
            report.delegations, report.index_entries
        ));
    }

    Ok(report)
}

/// Check if the LMDB data directory looks valid before opening.
///
/// Returns `Ok(())` for a fresh (nonexistent) directory. Returns an error
/// if the directory exists but `data.mdb` is missing, which suggests
/// corruption or misconfiguration.
pub fn check_data_dir(path: &Path) -> Result<(), String> {
    if !path.exists() {
        return Ok(());
    }
    let data_file = path.join("data.mdb");
    if !data_file.exists() {
        return Err(format!(
            "LMDB directory exists but data.mdb is missing at {}",
            path.display()
        ));
    }
    Ok(())
}
