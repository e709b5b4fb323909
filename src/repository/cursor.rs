//! Opaque pagination cursors.
//!
//! A cursor remembers the position of the last record of a page: its sort key
//! values, then ID and Type as tie-breakers. On the wire it is
//! `hex(crc32 || msgpack(cursor))`.

use crate::error::{Result, StoreError};
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Checksum prefix size.
const CHECKSUM_SIZE: usize = 4;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    pub keys: Vec<Value>,
    pub id: String,
    pub record_type: String,
}

impl Cursor {
    pub fn encode(&self) -> Result<String> {
        let body = rmp_serde::to_vec(self)?;
        let checksum = crc32fast::hash(&body);
        let mut buf = Vec::with_capacity(CHECKSUM_SIZE + body.len());
        buf.extend_from_slice(&checksum.to_le_bytes());
        buf.extend_from_slice(&body);
        Ok(hex::encode(buf))
    }

    pub fn decode(token: &str) -> Result<Self> {
        let bytes = hex::decode(token)
            .map_err(|e| StoreError::invalid_type("cursor", format!("non-hex token ({e})")))?;
        if bytes.len() < CHECKSUM_SIZE {
            return Err(StoreError::invalid_type("cursor", "truncated token"));
        }
        let (head, body) = bytes.split_at(CHECKSUM_SIZE);
        let mut stored = [0u8; CHECKSUM_SIZE];
        stored.copy_from_slice(head);
        let expected = u32::from_le_bytes(stored);
        let computed = crc32fast::hash(body);
        if expected != computed {
            return Err(StoreError::invalid_type(
                "cursor",
                format!("checksum mismatch: expected {expected}, got {computed}"),
            ));
        }
        rmp_serde::from_slice(body)
            .map_err(|e| StoreError::invalid_type("cursor", format!("undecodable token ({e})")))
    }
}
