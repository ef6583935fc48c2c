//! Name block codec.
//!
//! On-disk layout, all integers big-endian:
//!
//! ```text
//! | magic 4 | store id 4 | store key 8 | flag 1 | pad size 1 | name size 2 |
//! | name 0~65535 | padding 0~7 |
//! ```
//!
//! The name is the only variable field; the fixed head alone carries the
//! (store id, store key) tuple a read needs. Blocks end on an 8-byte
//! boundary and the stored pad size is authoritative.

use byteorder::{BigEndian, ByteOrder};

pub use crate::block::{
    align, check_file_head, file_head, FILE_HEAD_SIZE, FLAG_DEL, FLAG_OK, HEAD_VERSION,
};
use crate::block::BLOCK_MAGIC;
use crate::{Error, Result};

pub const DATA_FILE_MAGIC: [u8; 4] = [0xff, 0x4e, 0x46, 0x49];

pub const BLOCK_HEAD_SIZE: usize = 20;

/// Byte offset of the flag field within a block, for in-place tombstones.
pub const FLAG_OFFSET: u64 = 16;

/// Total on-disk size of a block naming `name_len` bytes, plus pad size.
pub fn encoded_size(name_len: usize) -> (u32, u8) {
    align(BLOCK_HEAD_SIZE as u32 + name_len as u32)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHead {
    pub store_id: u32,
    pub store_key: u64,
    pub flag: u8,
    pub pad_size: u8,
    pub name_size: u16,
}

impl BlockHead {
    pub fn decode(buf: &[u8]) -> Result<BlockHead> {
        if buf.len() < BLOCK_HEAD_SIZE {
            return Err(Error::BlockShort);
        }
        if buf[..4] != BLOCK_MAGIC {
            return Err(Error::BlockMagic);
        }
        Ok(BlockHead {
            store_id: BigEndian::read_u32(&buf[4..8]),
            store_key: BigEndian::read_u64(&buf[8..16]),
            flag: buf[16],
            pad_size: buf[17],
            name_size: BigEndian::read_u16(&buf[18..20]),
        })
    }

    /// On-disk length of the whole block, trusting the stored pad size.
    pub fn block_size(&self) -> u32 {
        BLOCK_HEAD_SIZE as u32 + self.name_size as u32 + self.pad_size as u32
    }
}

/// Serialize one live block into `buf`, which must already have the
/// length reported by [`encoded_size`]. Pad bytes are left as found.
pub fn encode(name: &[u8], store_id: u32, store_key: u64, buf: &mut [u8]) {
    let (size, pad_size) = encoded_size(name.len());
    debug_assert_eq!(buf.len(), size as usize);

    buf[..4].copy_from_slice(&BLOCK_MAGIC);
    BigEndian::write_u32(&mut buf[4..8], store_id);
    BigEndian::write_u64(&mut buf[8..16], store_key);
    buf[16] = FLAG_OK;
    buf[17] = pad_size;
    BigEndian::write_u16(&mut buf[18..20], name.len() as u16);
    buf[BLOCK_HEAD_SIZE..BLOCK_HEAD_SIZE + name.len()].copy_from_slice(name);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_to_vec(name: &[u8], store_id: u32, store_key: u64) -> Vec<u8> {
        let (size, _) = encoded_size(name.len());
        let mut buf = vec![0u8; size as usize];
        encode(name, store_id, store_key, &mut buf);
        buf
    }

    #[test]
    fn roundtrip() {
        let buf = encode_to_vec(b"foo", 7, 0x1122);
        assert_eq!(buf.len(), 24);

        let head = BlockHead::decode(&buf).unwrap();
        assert_eq!(head.store_id, 7);
        assert_eq!(head.store_key, 0x1122);
        assert_eq!(head.flag, FLAG_OK);
        assert_eq!(head.name_size, 3);
        assert_eq!(head.block_size(), 24);
        assert_eq!(
            &buf[BLOCK_HEAD_SIZE..BLOCK_HEAD_SIZE + head.name_size as usize],
            b"foo"
        );
    }

    #[test]
    fn blocks_are_aligned() {
        for name_len in [0, 1, 3, 4, 7, 8, 49, 50, 51, 255] {
            let buf = encode_to_vec(&vec![b'n'; name_len], 1, 2);
            assert_eq!(buf.len() % 8, 0, "name_len={name_len}");
        }
    }

    #[test]
    fn wrong_magic() {
        let mut buf = encode_to_vec(b"x", 1, 2);
        buf[0] = 0x00;
        assert!(matches!(BlockHead::decode(&buf), Err(Error::BlockMagic)));
    }

    #[test]
    fn short_buffer() {
        let buf = encode_to_vec(b"x", 1, 2);
        assert!(matches!(
            BlockHead::decode(&buf[..BLOCK_HEAD_SIZE - 1]),
            Err(Error::BlockShort)
        ));
    }
}
