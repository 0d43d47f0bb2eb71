//! The delegation record.

use serde::{Deserialize, Serialize};

/// One baking-delegation event, uniquely identified by its upstream `id`.
///
/// Numeric fields are carried as decimal strings so that values beyond the
/// range of `f64`/`i64` in downstream consumers survive untouched.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Delegation {
    /// Event time, `YYYY-MM-DDTHH:MM:SSZ`. Sort key and pagination cursor.
    pub timestamp: String,
    /// Address that issued the delegation.
    pub delegator: String,
    /// Delegated amount (mutez), decimal string.
    pub amount: String,
    /// Block height the event was included at, decimal string.
    pub level: String,
    /// Upstream operation id; the deduplication key.
    pub id: String,
}

impl Delegation {
    pub fn new(
        timestamp: impl Into<String>,
        delegator: impl Into<String>,
        amount: impl Into<String>,
        level: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: timestamp.into(),
            delegator: delegator.into(),
            amount: amount.into(),
            level: level.into(),
            id: id.into(),
        }
    }
}
