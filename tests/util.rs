//! Shared byte-level helpers for hand-building synthetic container images,
//! included by both `tests/integration.rs` and `benches/read-amplification.rs`
//! (neither can depend on the other, so the on-disk constants and writers
//! live here once). Every constant mirrors a private value in
//! `libapfs::definitions` since that module isn't part of the public API.

pub const BLOCK_SIZE: usize = 4096;
pub const NX_MAGIC: u32 = 0x4253_584E;
pub const VSB_MAGIC: u32 = 0x4253_5041;

pub const TYPE_SUPERBLOCK: u16 = 0x01;
pub const TYPE_ROOT_NODE: u16 = 0x02;
pub const TYPE_SUPERBLOCK_MAP: u16 = 0x0C;
pub const TYPE_VOLUME_SUPERBLOCK: u16 = 0x0D;

pub const CONTENT_EMPTY: u16 = 0x00;
pub const CONTENT_LOCATION: u16 = 0x0B;
pub const CONTENT_FILES: u16 = 0x0E;

pub const RECORD_INODE: u8 = 3;
pub const RECORD_ATTRIBUTE: u8 = 4;
pub const RECORD_EXTENT: u8 = 8;
pub const RECORD_DIR_ENTRY: u8 = 9;

pub const ROOT_PARENT_INO: u64 = 1;
pub const ROOT_INO: u64 = 2;

pub const S_IFDIR: u16 = 0o040000;
pub const S_IFREG: u16 = 0o100000;
pub const S_IFLNK: u16 = 0o120000;

pub const FLAG_LEAF: u16 = 1 << 0;
pub const FLAG_FIXED_KV: u16 = 1 << 1;

pub fn w16(buf: &mut [u8], off: usize, v: u16) {
    buf[off..off + 2].copy_from_slice(&v.to_le_bytes());
}
pub fn w32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
}
pub fn w64(buf: &mut [u8], off: usize, v: u64) {
    buf[off..off + 8].copy_from_slice(&v.to_le_bytes());
}

/// Re-implements `libapfs::checksum::fletcher64` (private to the crate):
/// little-endian u32 words, two running sums mod 2^32-1.
pub fn fletcher64(data: &[u8]) -> u64 {
    let mut sum1: u64 = 0;
    let mut sum2: u64 = 0;
    for chunk in data.chunks(4) {
        let mut word_bytes = [0u8; 4];
        word_bytes[..chunk.len()].copy_from_slice(chunk);
        let word = u32::from_le_bytes(word_bytes) as u64;
        sum1 = (sum1 + word) % 0xFFFF_FFFF;
        sum2 = (sum2 + sum1) % 0xFFFF_FFFF;
    }
    (sum2 << 32) | sum1
}

pub fn stamp_checksum(block: &mut [u8]) {
    block[0..8].fill(0);
    let checksum = fletcher64(block);
    block[0..8].copy_from_slice(&checksum.to_le_bytes());
}

pub fn write_object_header(block: &mut [u8], object_id: u64, checkpoint_id: u64, block_type: u16, content_type: u16) {
    w64(block, 8, object_id);
    w64(block, 16, checkpoint_id);
    w16(block, 24, block_type);
    w16(block, 26, 0);
    w16(block, 28, content_type);
    w16(block, 30, 0);
}

/// Writes the 100-byte fixed inode header with every variable-field count
/// zeroed; `uncompressed_size` doubles as the logical size `Mount::stat`
/// reports for a plain (non-directory, non-symlink, non-compressed) file.
pub fn write_inode_record(value: &mut [u8; 100], parent_id: u64, private_id: u64, mode: u16, nlink: i32, uncompressed_size: u64) {
    w64(value, 0, parent_id);
    w64(value, 8, private_id);
    w64(value, 16, 0); // create_time
    w64(value, 24, 0); // mod_time
    w64(value, 32, 0); // change_time
    w64(value, 40, 0); // access_time
    w64(value, 48, 0); // internal_flags
    w32(value, 56, nlink as u32); // nchildren_or_nlink
    w32(value, 60, 0); // default_protection_class
    w32(value, 64, 0); // write_generation_counter
    w32(value, 68, 0); // bsd_flags
    w32(value, 72, 0); // owner
    w32(value, 76, 0); // group
    w16(value, 80, mode);
    w64(value, 84, uncompressed_size);
    w16(value, 92, 0); // field_count
    w16(value, 94, 0); // fields_total_size
}

pub fn files_key_prefix(parent_id: u64, record_type: u8) -> u64 {
    (parent_id & ((1u64 << 60) - 1)) | ((record_type as u64) << 60)
}
