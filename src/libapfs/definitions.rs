/*
 * BSD 2-Clause License
 *
 * Copyright (c) 2021, Khaled Emara
 * All rights reserved.
 *
 * Redistribution and use in source and binary forms, with or without
 * modification, are permitted provided that the following conditions are met:
 *
 * 1. Redistributions of source code must retain the above copyright notice, this
 *    list of conditions and the following disclaimer.
 *
 * 2. Redistributions in binary form must reproduce the above copyright notice,
 *    this list of conditions and the following disclaimer in the documentation
 *    and/or other materials provided with the distribution.
 *
 * THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS"
 * AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO, THE
 * IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
 * DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE
 * FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL, EXEMPLARY, OR CONSEQUENTIAL
 * DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
 * SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER
 * CAUSED AND ON ANY THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY,
 * OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE
 * OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.
 */
#![allow(dead_code)]

// Magic numbers, little-endian as they sit on disk (apfs_struct.h).
pub const APFS_NX_MAGIC: u32 = 0x4253584E; // 'NXSB', container superblock
pub const APFS_VSB_MAGIC: u32 = 0x42535041; // 'APSB', volume superblock
pub const APFS_EFI_JUMPSTART_MAGIC: u32 = 0x5244534A; // 'JSDR'
pub const APFS_ENCRYPTION_BLOCK_MAGIC: u32 = 0x464C4142; // 'BALF'

pub const APFS_MSB_OFFSET: u64 = 0x0;
pub const APFS_MSB_SIZE: u64 = 0x1000;
pub const APFS_MAX_SUBVOLUMES: usize = 100;

pub const APFS_VSB_CASE_NSENS: u32 = 0x01;

pub const APFS_ROOT_PARENT_INO: u64 = 0x01;
pub const APFS_ROOT_INO: u64 = 0x02;
pub const APFS_PRIVATE_DIR_INO: u64 = 0x03;
pub const APFS_SNAPSHOT_DIR_INO: u64 = 0x06;
pub const APFS_FIRST_FREE_INO: u64 = 0x10;

// apfs_block_header.block_type
pub const APFS_TYPE_EMPTY: u16 = 0x00;
pub const APFS_TYPE_SUPERBLOCK: u16 = 0x01;
pub const APFS_TYPE_ROOT_NODE_BLOCK: u16 = 0x02;
pub const APFS_TYPE_NODE_BLOCK: u16 = 0x03;
pub const APFS_TYPE_BITMAP_DESCRIPTOR: u16 = 0x05;
pub const APFS_TYPE_BITMAP_INDEX_BLOCK: u16 = 0x06;
pub const APFS_TYPE_BITMAP_RECORD_BLOCK: u16 = 0x07;
pub const APFS_TYPE_BTREE: u16 = 0x0B;
pub const APFS_TYPE_SUPERBLOCK_MAP: u16 = 0x0C;
pub const APFS_TYPE_VOLUME_SUPERBLOCK: u16 = 0x0D;
pub const APFS_TYPE_VOLUME_REAP: u16 = 0x11;
pub const APFS_TYPE_REAP_LIST: u16 = 0x12;
pub const APFS_TYPE_EFI_JUMPSTART: u16 = 0x14;
pub const APFS_TYPE_FUSION: u16 = 0x16;
pub const APFS_TYPE_FUSION_LIST: u16 = 0x17;
pub const APFS_TYPE_ENCRYPTION_DESCRIPTOR: u16 = 0x18;
pub const APFS_TYPE_ENCRYPTION_ROOT: u16 = 0x19;
pub const APFS_TYPE_ENCRYPTION: u16 = 0x1B;
pub const APFS_TYPE_MAX_VALID: u16 = 0x1B;

// apfs_block_header.content_type
pub const APFS_CONTENT_EMPTY: u16 = 0x00;
pub const APFS_CONTENT_HISTORY: u16 = 0x09;
pub const APFS_CONTENT_LOCATION: u16 = 0x0B;
pub const APFS_CONTENT_FILES: u16 = 0x0E;
pub const APFS_CONTENT_EXTENTS: u16 = 0x0F;
pub const APFS_CONTENT_SNAPSHOTS: u16 = 0x10;
pub const APFS_CONTENT_SNAPSHOTS_MAP: u16 = 0x13;
pub const APFS_CONTENT_FUSION: u16 = 0x15;
pub const APFS_CONTENT_ENCRYPTION: u16 = 0x1A;
pub const APFS_CONTENT_MAX_VALID: u16 = 0x1A;

// apfs_block_header.flags
pub const APFS_BLOCK_FLAG_COMMON: u16 = 0x0000;
pub const APFS_BLOCK_FLAG_POSITION: u16 = 0x4000;
pub const APFS_BLOCK_FLAG_CONTAINER: u16 = 0x8000;

// Files-tree record types (spec.md 3.5); packed into the high 4 bits of the
// 64-bit key prefix alongside a 60-bit parent id.
pub const APFS_RECORD_SNAPSHOT_CHECKPOINT: u8 = 1;
pub const APFS_RECORD_VOLUME_EXTENT: u8 = 2;
pub const APFS_RECORD_INODE: u8 = 3;
pub const APFS_RECORD_ATTRIBUTE: u8 = 4;
pub const APFS_RECORD_HARDLINK: u8 = 5;
pub const APFS_RECORD_EXTENT_STATUS: u8 = 6;
pub const APFS_RECORD_ENCRYPTION: u8 = 7;
pub const APFS_RECORD_EXTENT: u8 = 8;
pub const APFS_RECORD_DIR_ENTRY: u8 = 9;
pub const APFS_RECORD_DIR_STATS: u8 = 10;
pub const APFS_RECORD_SNAPSHOT_NAME: u8 = 11;
pub const APFS_RECORD_HARDLINK_ID: u8 = 12;

// apfs_xattr type
pub const APFS_XATTR_TYPE_INLINE: u16 = 0;
pub const APFS_XATTR_TYPE_EXTENT_REF: u16 = 1;

// Inode field types (spec.md 3.6)
pub const APFS_INODE_FIELD_DOC_ID: u8 = 0x03;
pub const APFS_INODE_FIELD_NAME: u8 = 0x04;
pub const APFS_INODE_FIELD_INTERNAL: u8 = 0x05;
pub const APFS_INODE_FIELD_DATA_SIZE: u8 = 0x08;
pub const APFS_INODE_FIELD_SPARSE_BYTES: u8 = 0x0D;
pub const APFS_INODE_FIELD_DEVICE: u8 = 0x0E;

// decmpfs header
pub const APFS_DECMPFS_MAGIC: u32 = 0x636D_7066; // "fpmc" little-endian bytes
pub const APFS_COMPRESS_ZLIB_INLINE: u16 = 3;
pub const APFS_COMPRESS_ZLIB_RSRC: u16 = 4;
pub const APFS_COMPRESS_ZERO: u16 = 5;
pub const APFS_COMPRESS_LZVN_INLINE: u16 = 7;
pub const APFS_COMPRESS_LZVN_RSRC: u16 = 8;

pub const APFS_EA_NAME_SYMLINK: &str = "com.apple.fs.symlink";
pub const APFS_EA_NAME_RESOURCE_FORK: &str = "com.apple.ResourceFork";
pub const APFS_EA_NAME_DECMPFS: &str = "com.apple.decmpfs";

/// A block-resident sentinel meaning "hole" / "no physical backing".
pub const APFS_SPARSE_BLOCK: u64 = 0;
/// Logical-cluster-number sentinel returned by the extent resolver for
/// holes and unmapped tails, distinct from any real block number.
pub const SPARSE_LCN: u64 = u64::MAX;

// j_inode_flags (Apple File System Reference): inode.rs's `internal_flags`.
pub const INODE_IS_APFS_PRIVATE: u64 = 0x0000_0001;
pub const INODE_MAINTAIN_DIR_STATS: u64 = 0x0000_0002;
pub const INODE_DIR_STATS_ORIGIN: u64 = 0x0000_0004;
pub const INODE_PROT_CLASS_EXPLICIT: u64 = 0x0000_0008;
pub const INODE_WAS_CLONED: u64 = 0x0000_0010;
pub const INODE_FLAG_UNUSED: u64 = 0x0000_0020;
pub const INODE_HAS_SECURITY_EA: u64 = 0x0000_0040;
pub const INODE_BEING_TRUNCATED: u64 = 0x0000_0080;
pub const INODE_HAS_FINDER_INFO: u64 = 0x0000_0100;
pub const INODE_IS_SPARSE: u64 = 0x0000_0200;
pub const INODE_WAS_EVER_CLONED: u64 = 0x0000_0400;
pub const INODE_ACTIVE_FILE_TRIMMED: u64 = 0x0000_0800;
pub const INODE_HAS_RSRC_FORK: u64 = 0x0000_1000;
pub const INODE_NO_RSRC_FORK: u64 = 0x0000_2000;
pub const INODE_ALLOCATION_SPILLEDOVER: u64 = 0x0000_4000;
pub const INODE_FAST_PROMOTE: u64 = 0x0000_8000;
pub const INODE_HAS_UNCOMPRESSED_SIZE: u64 = 0x0001_0000;
pub const INODE_IS_PURGEABLE: u64 = 0x0002_0000;
pub const INODE_WANTS_TO_BE_PURGEABLE: u64 = 0x0004_0000;
pub const INODE_IS_SYNCED: u64 = 0x0008_0000;

// Standard BSD `chflags`/`stat.st_flags` bits: inode.rs's `bsd_flags`.
pub const UF_NODUMP: u32 = 0x0000_0001;
pub const UF_IMMUTABLE: u32 = 0x0000_0002;
pub const UF_APPEND: u32 = 0x0000_0004;
pub const UF_OPAQUE: u32 = 0x0000_0008;
pub const UF_COMPRESSED: u32 = 0x0000_0020;
pub const UF_TRACKED: u32 = 0x0000_0040;
pub const UF_HIDDEN: u32 = 0x0000_8000;
pub const SF_ARCHIVED: u32 = 0x0001_0000;
pub const SF_IMMUTABLE: u32 = 0x0002_0000;
pub const SF_APPEND: u32 = 0x0004_0000;
pub const SF_RESTRICTED: u32 = 0x0008_0000;
pub const SF_NOUNLINK: u32 = 0x0010_0000;

// Standard POSIX mode bits (not APFS-specific): inode.rs's `mode` field.
pub const S_IFMT: u16 = 0o170000;
pub const S_IFIFO: u16 = 0o010000;
pub const S_IFCHR: u16 = 0o020000;
pub const S_IFDIR: u16 = 0o040000;
pub const S_IFBLK: u16 = 0o060000;
pub const S_IFREG: u16 = 0o100000;
pub const S_IFLNK: u16 = 0o120000;
pub const S_IFSOCK: u16 = 0o140000;

// On-disk type aliases, little-endian. Named after the teacher's XfsFoo
// convention (definitions.rs), mapped onto APFS's vocabulary.
pub type ApfsObjectId = u64; // stable object identity
pub type ApfsCheckpointId = u64; // checkpoint sequence number
pub type ApfsBlockNumber = u64; // physical block index into the container
pub type ApfsFileOffset = u64; // byte offset within a file/stream
pub type ApfsInodeId = u64; // inode object id (also an ApfsObjectId)
pub type ApfsNameHash = u32; // 22 significant bits, low bits of a packed u32
pub type ApfsCryptoId = u64; // per-extent AES-XTS tweak base
