//! Wire types for the daemon protocol.
//!
//! Requests and responses map 1:1 onto the engine operations and carry
//! no logic of their own. Frames are bincode payloads preceded by a
//! u64 length so the server can `read_exact` the rest.

use serde::{Deserialize, Serialize};

use crate::{NameStats, StoreStats};

#[derive(Debug, Serialize, Deserialize)]
pub enum StoreRequest {
    Write { key: u64, meta: Vec<u8>, data: Vec<u8> },
    Read { key: u64 },
    Delete { key: u64 },
    Stats,
}

#[derive(Debug, Serialize, Deserialize)]
pub enum StoreResponse {
    Written,
    Object { meta: Vec<u8>, data: Vec<u8>, size: u32 },
    Deleted,
    Stats(StoreStats),
    Error(String),
}

#[derive(Debug, Serialize, Deserialize)]
pub enum NameRequest {
    Write {
        name: String,
        store_id: u32,
        store_key: u64,
    },
    Read {
        name: String,
    },
    Delete {
        name: String,
    },
    Stats,
}

#[derive(Debug, Serialize, Deserialize)]
pub enum NameResponse {
    Written,
    Location { store_id: u32, store_key: u64 },
    Deleted,
    Stats(NameStats),
    Error(String),
}

/// Serialize `$value` onto `$stream` behind its length hint.
#[macro_export]
macro_rules! send_frame {
    ($stream:expr, $value:expr) => {
        let data = bincode::serialize(&$value)?;
        $stream.write_u64(data.len() as u64).await?;
        $stream.write_all(&data).await?;
        $stream.flush().await?;
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_roundtrip_through_bincode() {
        let req = StoreRequest::Write {
            key: 0xDEAD,
            meta: b"m".to_vec(),
            data: b"hello".to_vec(),
        };
        let bytes = bincode::serialize(&req).unwrap();
        match bincode::deserialize(&bytes).unwrap() {
            StoreRequest::Write { key, meta, data } => {
                assert_eq!(key, 0xDEAD);
                assert_eq!(meta, b"m");
                assert_eq!(data, b"hello");
            }
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn responses_roundtrip_through_bincode() {
        let res = NameResponse::Location {
            store_id: 7,
            store_key: 0x1122,
        };
        let bytes = bincode::serialize(&res).unwrap();
        match bincode::deserialize(&bytes).unwrap() {
            NameResponse::Location {
                store_id,
                store_key,
            } => {
                assert_eq!((store_id, store_key), (7, 0x1122));
            }
            other => panic!("unexpected response {other:?}"),
        }
    }
}
