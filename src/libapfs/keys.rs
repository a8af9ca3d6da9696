//! Key factory (spec.md 2 component 6, 3.5): typed key comparators for
//! every content type and `Files` record type.
//!
//! Grounded on the teacher's `BmbtKey`/`XfsDa3NodeEntry` fixed-key structs
//! and the `partition_point`-based comparison idiom in `btree.rs`/
//! `da_btree.rs`/`dir3.rs`. Bit-packed fields follow spec.md 9's guidance:
//! explicit mask-and-shift accessors around a `u32`/`u64`, never a host
//! bit-field layout.

use std::cmp::Ordering;

use crate::libapfs::checksum::{read_u32_le, read_u64_le};
use crate::libapfs::definitions::*;
use crate::libapfs::error::{Error, Result};
use crate::libapfs::object::ContentType;

/// `(object_id asc, checkpoint_id asc)` (spec.md 3.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LocationKey {
    pub object_id: u64,
    pub checkpoint_id: u64,
}

impl LocationKey {
    pub const SIZE: usize = 16;

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(Error::corrupt("location key truncated"));
        }
        Ok(LocationKey {
            object_id: read_u64_le(bytes, 0),
            checkpoint_id: read_u64_le(bytes, 8),
        })
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..8].copy_from_slice(&self.object_id.to_le_bytes());
        buf[8..16].copy_from_slice(&self.checkpoint_id.to_le_bytes());
        buf
    }
}

/// The low-60/high-4 packed `(parent_id, record_type)` prefix shared by
/// every `Files` content key (spec.md 3.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilesKeyPrefix {
    pub parent_id: u64,
    pub record_type: u8,
}

const PARENT_ID_MASK: u64 = (1u64 << 60) - 1;

impl FilesKeyPrefix {
    pub fn pack(parent_id: u64, record_type: u8) -> u64 {
        (parent_id & PARENT_ID_MASK) | ((record_type as u64) << 60)
    }

    pub fn parse(raw: u64) -> Self {
        FilesKeyPrefix {
            parent_id: raw & PARENT_ID_MASK,
            record_type: (raw >> 60) as u8,
        }
    }

    pub fn parse_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 8 {
            return Err(Error::corrupt("files key prefix truncated"));
        }
        Ok(Self::parse(read_u64_le(bytes, 0)))
    }
}

/// `DirEntryKey { parent_id, name_hash:22, name_len:10, name[] }` (spec.md
/// 3.9). `name_len` occupies the low 10 bits (declared first, LSB-first per
/// spec.md 9), `name_hash` the next 22.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryKey {
    pub parent_id: u64,
    pub name_hash: u32,
    pub name: Vec<u8>,
}

impl DirEntryKey {
    pub fn pack_hash_len(name_hash: u32, name_len: u16) -> u32 {
        (name_len as u32 & 0x3FF) | ((name_hash & 0x3F_FFFF) << 10)
    }

    pub fn unpack_hash_len(v: u32) -> (u32, u16) {
        let name_len = (v & 0x3FF) as u16;
        let name_hash = (v >> 10) & 0x3F_FFFF;
        (name_hash, name_len)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let prefix = FilesKeyPrefix::parse_bytes(bytes)?;
        if bytes.len() < 12 {
            return Err(Error::corrupt("direntry key truncated"));
        }
        let hash_and_len = read_u32_le(bytes, 8);
        let (name_hash, name_len) = Self::unpack_hash_len(hash_and_len);
        let name_start = 12;
        let name_end = name_start + name_len as usize;
        if bytes.len() < name_end {
            return Err(Error::corrupt("direntry key name truncated"));
        }
        Ok(DirEntryKey {
            parent_id: prefix.parent_id,
            name_hash,
            name: bytes[name_start..name_end].to_vec(),
        })
    }

    /// Build the prefix used to start a cursor at `(parent_id, DirEntry)`
    /// with no name yet known (spec.md 4.13).
    pub fn prefix_only(parent_id: u64) -> [u8; 8] {
        FilesKeyPrefix::pack(parent_id, APFS_RECORD_DIR_ENTRY).to_le_bytes()
    }
}

/// `(extent_owner_id, file_offset)` (spec.md 3.5, 4.7). Extent records live
/// as `Files`-content leaves (spec.md 3.6's per-inode tree pass already
/// reads them this way), so the owner id shares the same
/// `FilesKeyPrefix(parent_id=owner_id, record_type=Extent)` packing as every
/// other `Files` key rather than a bare `u64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ExtentKey {
    pub owner_id: u64,
    pub file_offset: u64,
}

impl ExtentKey {
    pub const SIZE: usize = 16;

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let prefix = FilesKeyPrefix::parse_bytes(bytes)?;
        if bytes.len() < Self::SIZE {
            return Err(Error::corrupt("extent key truncated"));
        }
        Ok(ExtentKey {
            owner_id: prefix.parent_id,
            file_offset: read_u64_le(bytes, 8),
        })
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..8].copy_from_slice(&FilesKeyPrefix::pack(self.owner_id, APFS_RECORD_EXTENT).to_le_bytes());
        buf[8..16].copy_from_slice(&self.file_offset.to_le_bytes());
        buf
    }
}

/// Compare two raw on-disk keys under the ordering for `content_type`
/// (spec.md 3.5, 4.4 invariant 2). Keys of `Files` content always compare
/// `(parent_id, record_type)` first, then a type-specific suffix.
pub fn compare_keys(content_type: ContentType, a: &[u8], b: &[u8]) -> Result<Ordering> {
    match content_type {
        ContentType::Location | ContentType::Encryption => {
            let ka = read_u64_le(a, 0);
            let kb = read_u64_le(b, 0);
            Ok(ka.cmp(&kb).then_with(|| {
                if a.len() >= 16 && b.len() >= 16 {
                    read_u64_le(a, 8).cmp(&read_u64_le(b, 8))
                } else {
                    Ordering::Equal
                }
            }))
        }
        ContentType::History => {
            let ca = read_u64_le(a, 0);
            let cb = read_u64_le(b, 0);
            Ok(ca.cmp(&cb).then_with(|| read_u64_le(a, 8).cmp(&read_u64_le(b, 8))))
        }
        ContentType::SnapshotsMap => Ok(read_u64_le(a, 0).cmp(&read_u64_le(b, 0))),
        ContentType::Extents => {
            let ka = ExtentKey::parse(a)?;
            let kb = ExtentKey::parse(b)?;
            Ok(ka.cmp(&kb))
        }
        ContentType::Files => compare_files_keys(a, b),
        other => Err(Error::NotImplemented(format!(
            "no key order defined for content type {other:?}"
        ))),
    }
}

fn compare_files_keys(a: &[u8], b: &[u8]) -> Result<Ordering> {
    let pa = FilesKeyPrefix::parse_bytes(a)?;
    let pb = FilesKeyPrefix::parse_bytes(b)?;
    let prefix_order = pa
        .parent_id
        .cmp(&pb.parent_id)
        .then(pa.record_type.cmp(&pb.record_type));
    if prefix_order != Ordering::Equal {
        return Ok(prefix_order);
    }
    if pa.record_type == APFS_RECORD_DIR_ENTRY {
        // name_hash participates in ordering before the name bytes. A bare
        // 8-byte prefix (no hash/name suffix) is used to seek to the start
        // of a parent's entries and sorts before any real entry under it.
        if a.len() < 12 || b.len() < 12 {
            return Ok(a.len().cmp(&b.len()));
        }
        let ha = read_u32_le(a, 8);
        let hb = read_u32_le(b, 8);
        let (hash_a, _) = DirEntryKey::unpack_hash_len(ha);
        let (hash_b, _) = DirEntryKey::unpack_hash_len(hb);
        Ok(hash_a.cmp(&hash_b).then_with(|| a[12..].cmp(&b[12..])))
    } else if pa.record_type == APFS_RECORD_EXTENT || pa.record_type == APFS_RECORD_EXTENT_STATUS {
        let oa = if a.len() >= 16 { read_u64_le(a, 8) } else { 0 };
        let ob = if b.len() >= 16 { read_u64_le(b, 8) } else { 0 };
        Ok(oa.cmp(&ob))
    } else {
        // Remaining record types: byte-compare whatever suffix follows the
        // prefix (attribute names, hard-link names, ...).
        Ok(a[8..].cmp(&b[8..]))
    }
}

/// Whether `record_type` of `b` matches the search's expected type, honoring
/// the `ALL_TYPES` flag (spec.md 4.4).
pub fn files_type_matches(expected: u8, b: &[u8], all_types: bool) -> Result<bool> {
    if all_types {
        return Ok(true);
    }
    let pb = FilesKeyPrefix::parse_bytes(b)?;
    Ok(pb.record_type == expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_key_ordering() {
        let a = LocationKey { object_id: 1, checkpoint_id: 5 };
        let b = LocationKey { object_id: 1, checkpoint_id: 6 };
        assert!(a < b);
    }

    #[test]
    fn files_key_prefix_roundtrip() {
        let packed = FilesKeyPrefix::pack(0x0FFF_FFFF_FFFF_FFFF, 9);
        let parsed = FilesKeyPrefix::parse(packed);
        assert_eq!(parsed.parent_id, 0x0FFF_FFFF_FFFF_FFFF);
        assert_eq!(parsed.record_type, 9);
    }

    #[test]
    fn direntry_hash_len_roundtrip() {
        let packed = DirEntryKey::pack_hash_len(0x3FFFFF, 1000);
        let (hash, len) = DirEntryKey::unpack_hash_len(packed);
        assert_eq!(hash, 0x3FFFFF);
        assert_eq!(len, 1000);
    }

    #[test]
    fn files_ordering_prefers_hash_before_name() {
        let mut a = FilesKeyPrefix::pack(1, APFS_RECORD_DIR_ENTRY).to_le_bytes().to_vec();
        a.extend_from_slice(&DirEntryKey::pack_hash_len(5, 1).to_le_bytes());
        a.push(b'z');
        let mut b = FilesKeyPrefix::pack(1, APFS_RECORD_DIR_ENTRY).to_le_bytes().to_vec();
        b.extend_from_slice(&DirEntryKey::pack_hash_len(6, 1).to_le_bytes());
        b.push(b'a');
        assert_eq!(compare_files_keys(&a, &b).unwrap(), Ordering::Less);
    }
}
