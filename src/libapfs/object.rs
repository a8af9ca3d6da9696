//! Object header (spec.md 3.1): the 32-byte prefix on every managed block.

use bincode::Decode;

use crate::libapfs::definitions::*;
use crate::libapfs::error::{Error, Result};

/// `apfs_block_header`, exactly as laid out in the on-disk format:
/// checksum(8) id(8) checkpoint_id(8) block_type(2) flags(2) content_type(2) padding(2).
#[derive(Debug, Clone, Copy, Decode)]
pub struct ObjectHeader {
    pub checksum: u64,
    pub object_id: ApfsObjectId,
    pub checkpoint_id: ApfsCheckpointId,
    pub block_type: u16,
    pub flags: u16,
    pub content_type: u16,
    _padding: u16,
}

impl ObjectHeader {
    pub const SIZE: usize = 32;

    pub fn block_type(&self) -> BlockType {
        BlockType::from_raw(self.block_type)
    }

    pub fn content_type(&self) -> ContentType {
        ContentType::from_raw(self.content_type)
    }

    pub fn is_position(&self) -> bool {
        self.flags & APFS_BLOCK_FLAG_POSITION != 0
    }

    pub fn is_container_meta(&self) -> bool {
        self.flags & APFS_BLOCK_FLAG_CONTAINER != 0
    }

    /// Build a header for tests elsewhere in the crate that need a
    /// plausible `ObjectHeader` without decoding real bytes.
    #[cfg(test)]
    pub(crate) fn test_instance(object_id: u64, checkpoint_id: u64, block_type: u16, content_type: u16) -> Self {
        ObjectHeader {
            checksum: 0,
            object_id,
            checkpoint_id,
            block_type,
            flags: 0,
            content_type,
            _padding: 0,
        }
    }

    /// Validate the structural invariants that hold for every loaded block
    /// (spec.md 3.1): position flag implies object_id equals the block's
    /// own physical number, and the recorded checkpoint never outruns the
    /// container's latest.
    pub fn validate(&self, block_number: u64, latest_checkpoint_id: u64) -> Result<()> {
        if self.is_position() && self.object_id != block_number {
            return Err(Error::corrupt(format!(
                "object id {} does not match block number {} under position flag",
                self.object_id, block_number
            )));
        }
        if self.checkpoint_id > latest_checkpoint_id {
            return Err(Error::corrupt(format!(
                "checkpoint id {} exceeds container latest {}",
                self.checkpoint_id, latest_checkpoint_id
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    Empty,
    Superblock,
    RootNode,
    Node,
    BitmapDescriptor,
    BitmapIndex,
    BitmapRecord,
    BTree,
    SuperblockMap,
    VolumeSuperblock,
    VolumeReap,
    ReapList,
    EfiJumpstart,
    Fusion,
    FusionList,
    EncryptionDescriptor,
    EncryptionRoot,
    Encryption,
    Other(u16),
}

impl BlockType {
    pub fn from_raw(v: u16) -> Self {
        match v {
            APFS_TYPE_EMPTY => BlockType::Empty,
            APFS_TYPE_SUPERBLOCK => BlockType::Superblock,
            APFS_TYPE_ROOT_NODE_BLOCK => BlockType::RootNode,
            APFS_TYPE_NODE_BLOCK => BlockType::Node,
            APFS_TYPE_BITMAP_DESCRIPTOR => BlockType::BitmapDescriptor,
            APFS_TYPE_BITMAP_INDEX_BLOCK => BlockType::BitmapIndex,
            APFS_TYPE_BITMAP_RECORD_BLOCK => BlockType::BitmapRecord,
            APFS_TYPE_BTREE => BlockType::BTree,
            APFS_TYPE_SUPERBLOCK_MAP => BlockType::SuperblockMap,
            APFS_TYPE_VOLUME_SUPERBLOCK => BlockType::VolumeSuperblock,
            APFS_TYPE_VOLUME_REAP => BlockType::VolumeReap,
            APFS_TYPE_REAP_LIST => BlockType::ReapList,
            APFS_TYPE_EFI_JUMPSTART => BlockType::EfiJumpstart,
            APFS_TYPE_FUSION => BlockType::Fusion,
            APFS_TYPE_FUSION_LIST => BlockType::FusionList,
            APFS_TYPE_ENCRYPTION_DESCRIPTOR => BlockType::EncryptionDescriptor,
            APFS_TYPE_ENCRYPTION_ROOT => BlockType::EncryptionRoot,
            APFS_TYPE_ENCRYPTION => BlockType::Encryption,
            other => BlockType::Other(other),
        }
    }

    pub fn is_node(&self) -> bool {
        matches!(self, BlockType::Node | BlockType::RootNode)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Empty,
    History,
    Location,
    Files,
    Extents,
    Snapshots,
    SnapshotsMap,
    Fusion,
    Encryption,
    Other(u16),
}

impl ContentType {
    pub fn from_raw(v: u16) -> Self {
        match v {
            APFS_CONTENT_EMPTY => ContentType::Empty,
            APFS_CONTENT_HISTORY => ContentType::History,
            APFS_CONTENT_LOCATION => ContentType::Location,
            APFS_CONTENT_FILES => ContentType::Files,
            APFS_CONTENT_EXTENTS => ContentType::Extents,
            APFS_CONTENT_SNAPSHOTS => ContentType::Snapshots,
            APFS_CONTENT_SNAPSHOTS_MAP => ContentType::SnapshotsMap,
            APFS_CONTENT_FUSION => ContentType::Fusion,
            APFS_CONTENT_ENCRYPTION => ContentType::Encryption,
            other => ContentType::Other(other),
        }
    }

    /// Content types that the B+-tree runtime requires to use fixed-size
    /// entries (spec.md 4.4 node-level invariants).
    pub fn requires_fixed_entries(&self) -> bool {
        matches!(
            self,
            ContentType::Location
                | ContentType::History
                | ContentType::SnapshotsMap
                | ContentType::Encryption
        )
    }
}
