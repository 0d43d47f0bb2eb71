//! LMDB environment setup.

use std::path::Path;

use heed::{Env, EnvOpenOptions};

use crate::LmdbError;

/// Default map size: 4 GiB, comfortably above the full delegation history.
pub const DEFAULT_MAP_SIZE: usize = 4 * 1024 * 1024 * 1024;

/// Number of named databases the store creates.
pub(crate) const MAX_DBS: u32 = 2;

/// Open or create an LMDB environment at `path`, creating the directory if
/// it does not exist yet.
pub fn open_env(path: &Path, max_dbs: u32, map_size: usize) -> Result<Env, LmdbError> {
    std::fs::create_dir_all(path)?;
    // SAFETY: the environment is opened once per path by this process and the
    // memory map is never modified outside of heed transactions.
    let env = unsafe {
        EnvOpenOptions::new()
            .map_size(map_size)
            .max_dbs(max_dbs)
            .open(path)
    }
    .map_err(LmdbError::from)?;
    Ok(env)
}
