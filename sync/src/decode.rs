//! Streaming decoder for upstream delegation pages.
//!
//! The body is walked element by element through a serde sequence visitor,
//! so no intermediate document tree is built and the body never has to
//! be held in full.

use std::fmt;
use std::io::Read;

use serde::de::{SeqAccess, Visitor};
use serde::{Deserialize, Deserializer};
use thiserror::Error;

use tezdel_types::Delegation;

/// Upper bound on the capacity hint honoured up front.
const MAX_PREALLOCATION: usize = 10_000;

#[derive(Debug, Error)]
#[error("malformed delegation page: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

#[derive(Deserialize)]
struct WireDelegation {
    timestamp: String,
    sender: WireSender,
    amount: u64,
    level: u64,
    id: u64,
}

#[derive(Deserialize)]
struct WireSender {
    address: String,
}

impl From<WireDelegation> for Delegation {
    fn from(wire: WireDelegation) -> Self {
        Delegation {
            timestamp: wire.timestamp,
            delegator: wire.sender.address,
            amount: wire.amount.to_string(),
            level: wire.level.to_string(),
            id: wire.id.to_string(),
        }
    }
}

struct PageVisitor {
    capacity: usize,
}

impl<'de> Visitor<'de> for PageVisitor {
    type Value = Vec<Delegation>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a JSON array of delegations")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut delegations = Vec::with_capacity(self.capacity.min(MAX_PREALLOCATION));
        while let Some(wire) = seq.next_element::<WireDelegation>()? {
            delegations.push(wire.into());
        }
        Ok(delegations)
    }
}

/// Decode a JSON array of wire delegations, preserving order.
///
/// `capacity` is only an allocation hint. Fails without partial results if
/// the input is not an array, any element is malformed, or anything but
/// whitespace follows the array.
pub fn decode_delegations<R: Read>(
    reader: R,
    capacity: usize,
) -> Result<Vec<Delegation>, DecodeError> {
    let mut de = serde_json::Deserializer::from_reader(reader);
    let delegations = (&mut de).deserialize_seq(PageVisitor { capacity })?;
    de.end()?;
    Ok(delegations)
}
