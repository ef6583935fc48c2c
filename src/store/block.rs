//! Store block codec.
//!
//! On-disk layout, all integers big-endian:
//!
//! ```text
//! | magic 4 | key 8 | flag 1 | pad size 1 | meta size 2 | data size 4 |
//! | meta 0~65535 | data ... | padding 0~7 |
//! ```
//!
//! Every block's total length is a multiple of 8; the stored pad size is
//! authoritative, the decoder never recomputes it. The codec does no I/O.

use byteorder::{BigEndian, ByteOrder};

pub use crate::block::{
    align, check_file_head, file_head, FILE_HEAD_SIZE, FLAG_DEL, FLAG_OK, HEAD_VERSION,
};
use crate::block::BLOCK_MAGIC;
use crate::{Error, Result};

pub const DATA_FILE_MAGIC: [u8; 4] = [0xff, 0x56, 0x46, 0x44];
pub const INDEX_FILE_MAGIC: [u8; 4] = [0xff, 0x56, 0x46, 0x49];

pub const BLOCK_HEAD_SIZE: usize = 20;

/// Byte offset of the flag field within a block, for in-place tombstones.
pub const FLAG_OFFSET: u64 = 12;

/// Total on-disk size of a block with the given body, plus its pad size.
pub fn encoded_size(meta_len: usize, data_len: usize) -> (u32, u8) {
    align(BLOCK_HEAD_SIZE as u32 + meta_len as u32 + data_len as u32)
}

/// The fixed-size head of a block; enough to size and classify it
/// without touching the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHead {
    pub key: u64,
    pub flag: u8,
    pub pad_size: u8,
    pub meta_size: u16,
    pub data_size: u32,
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
            key: BigEndian::read_u64(&buf[4..12]),
            flag: buf[12],
            pad_size: buf[13],
            meta_size: BigEndian::read_u16(&buf[14..16]),
            data_size: BigEndian::read_u32(&buf[16..20]),
        })
    }

    /// On-disk length of the whole block, trusting the stored pad size.
    pub fn block_size(&self) -> u32 {
        BLOCK_HEAD_SIZE as u32 + self.meta_size as u32 + self.data_size + self.pad_size as u32
    }
}

/// A decoded block borrowing its body from the read buffer.
#[derive(Debug, PartialEq, Eq)]
pub struct Block<'a> {
    pub key: u64,
    pub flag: u8,
    pub meta: &'a [u8],
    pub data: &'a [u8],
}

/// Serialize one live block into `buf`, which must already have the
/// length reported by [`encoded_size`]. Pad bytes are left as found.
pub fn encode(key: u64, meta: &[u8], data: &[u8], buf: &mut [u8]) {
    let (size, pad_size) = encoded_size(meta.len(), data.len());
    debug_assert_eq!(buf.len(), size as usize);

    buf[..4].copy_from_slice(&BLOCK_MAGIC);
    BigEndian::write_u64(&mut buf[4..12], key);
    buf[12] = FLAG_OK;
    buf[13] = pad_size;
    BigEndian::write_u16(&mut buf[14..16], meta.len() as u16);
    BigEndian::write_u32(&mut buf[16..20], data.len() as u32);

    let mut cursor = BLOCK_HEAD_SIZE;
    buf[cursor..cursor + meta.len()].copy_from_slice(meta);
    cursor += meta.len();
    buf[cursor..cursor + data.len()].copy_from_slice(data);
}

/// Decode a complete block read back by (offset, size); the buffer must
/// hold exactly the block.
pub fn decode(buf: &[u8]) -> Result<Block<'_>> {
    let head = BlockHead::decode(buf)?;
    if head.block_size() as usize != buf.len() {
        return Err(Error::BlockSizes);
    }
    let meta_end = BLOCK_HEAD_SIZE + head.meta_size as usize;
    let data_end = meta_end + head.data_size as usize;
    Ok(Block {
        key: head.key,
        flag: head.flag,
        meta: &buf[BLOCK_HEAD_SIZE..meta_end],
        data: &buf[meta_end..data_end],
    })
}
