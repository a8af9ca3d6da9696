//! Container super (spec.md 2 component 4, 4.1, 4.2, 3.2, 3.3).
//!
//! Grounded on the teacher's `sb.rs` (magic/checksum validation, panic-style
//! checks converted here to `Result`) and `original_source/apfs_struct.h`'s
//! `apfs_sb`/`apfs_sb_map_entry` for field layout and the ring-scan
//! semantics.

use crate::libapfs::checksum::{read_u32_le, read_u64_le, verify_block};
use crate::libapfs::definitions::*;
use crate::libapfs::device::Device;
use crate::libapfs::error::{Error, Result};
use crate::libapfs::object::{BlockType, ObjectHeader};
use crate::libapfs::utils::Uuid;

// Field offsets within the container superblock block, counted from byte 0
// (the object header occupies the first 32 bytes). These mirror the order
// of `apfs_sb` in original_source/apfs_struct.h, simplified to the fields
// this read-only core actually consults.
mod off {
    pub const MAGIC: usize = 32;
    pub const BLOCK_SIZE: usize = 36;
    pub const TOTAL_BLOCKS: usize = 40;
    pub const FEATURES: usize = 48;
    pub const RO_COMPAT: usize = 56;
    pub const INCOMPAT: usize = 64;
    pub const UUID: usize = 72;
    pub const NEXT_OBJECT_ID: usize = 88;
    pub const NEXT_CHECKPOINT_ID: usize = 96;
    pub const NUMBER_OF_SB: usize = 104;
    pub const NUMBER_OF_META: usize = 108;
    pub const FIRST_SB: usize = 112;
    pub const FIRST_META: usize = 120;
    pub const NEXT_SB: usize = 128;
    pub const NEXT_META: usize = 132;
    pub const CURRENT_SB: usize = 136;
    pub const CURRENT_SB_LEN: usize = 140;
    pub const CURRENT_META: usize = 144;
    pub const SPACEMAN_ID: usize = 152;
    pub const OMAP_OID: usize = 160;
    pub const REAPER_OID: usize = 168;
    pub const MAX_VOLUMES: usize = 176;
    pub const VOLUME_IDS: usize = 184; // [u64; APFS_MAX_SUBVOLUMES]
    pub const KEYBAG_BLOCK: usize = VOLUME_IDS + APFS_MAX_SUBVOLUMES * 8;
    pub const KEYBAG_COUNT: usize = KEYBAG_BLOCK + 8;
    pub const END: usize = KEYBAG_COUNT + 8;
}

#[derive(Debug, Clone)]
pub struct ContainerSuperblock {
    pub header: ObjectHeader,
    pub block_number: u64,
    pub block_size: u32,
    pub total_blocks: u64,
    pub features: u64,
    pub ro_compat: u64,
    pub incompat: u64,
    pub uuid: Uuid,
    pub next_object_id: u64,
    pub next_checkpoint_id: u64,
    pub number_of_sb: u32,
    pub number_of_meta: u32,
    pub first_sb: u64,
    pub first_meta: u64,
    pub next_sb: u32,
    pub next_meta: u32,
    pub current_sb: u32,
    pub current_sb_len: u32,
    pub current_meta: u32,
    pub spaceman_id: u64,
    pub omap_oid: u64,
    pub reaper_oid: u64,
    pub max_volumes: u32,
    pub volume_ids: Vec<u64>,
    pub keybag_block: u64,
    pub keybag_count: u32,
}

impl ContainerSuperblock {
    /// Parse and validate a candidate superblock block (spec.md 4.1). Does
    /// not itself select the *latest* checkpoint; see `locate_checkpoint`.
    pub fn parse(raw: &[u8], block_number: u64) -> Result<Self> {
        if raw.len() < off::END {
            return Err(Error::corrupt(format!(
                "superblock block {block_number} too short ({} bytes)",
                raw.len()
            )));
        }
        let (header, _) = crate::libapfs::utils::decode::<ObjectHeader>(raw)
            .map_err(|e| Error::corrupt(format!("object header: {e}")))?;
        if header.block_type() != BlockType::Superblock {
            return Err(Error::corrupt(format!(
                "block {block_number} is not a Superblock (type {})",
                raw[off::MAGIC]
            )));
        }

        let magic = read_u32_le(raw, off::MAGIC);
        if magic != APFS_NX_MAGIC {
            return Err(Error::FsUnknown(format!(
                "bad container magic {magic:#010x} at block {block_number}"
            )));
        }

        let block_size = read_u32_le(raw, off::BLOCK_SIZE);
        if !block_size.is_power_of_two() {
            return Err(Error::corrupt(format!(
                "block size {block_size} is not a power of two"
            )));
        }

        let total_blocks = read_u64_le(raw, off::TOTAL_BLOCKS);
        if total_blocks > (1u64 << 32) {
            return Err(Error::corrupt(format!(
                "total blocks {total_blocks} exceeds 2^32"
            )));
        }

        verify_block(raw, block_number)?;

        let mut uuid_bytes = [0u8; 16];
        uuid_bytes.copy_from_slice(&raw[off::UUID..off::UUID + 16]);

        let mut volume_ids = Vec::with_capacity(APFS_MAX_SUBVOLUMES);
        for i in 0..APFS_MAX_SUBVOLUMES {
            volume_ids.push(read_u64_le(raw, off::VOLUME_IDS + i * 8));
        }

        Ok(ContainerSuperblock {
            header,
            block_number,
            block_size,
            total_blocks,
            features: read_u64_le(raw, off::FEATURES),
            ro_compat: read_u64_le(raw, off::RO_COMPAT),
            incompat: read_u64_le(raw, off::INCOMPAT),
            uuid: Uuid::from_uuid(uuid::Uuid::from_bytes(uuid_bytes)),
            next_object_id: read_u64_le(raw, off::NEXT_OBJECT_ID),
            next_checkpoint_id: read_u64_le(raw, off::NEXT_CHECKPOINT_ID),
            number_of_sb: read_u32_le(raw, off::NUMBER_OF_SB),
            number_of_meta: read_u32_le(raw, off::NUMBER_OF_META),
            first_sb: read_u64_le(raw, off::FIRST_SB),
            first_meta: read_u64_le(raw, off::FIRST_META),
            next_sb: read_u32_le(raw, off::NEXT_SB),
            next_meta: read_u32_le(raw, off::NEXT_META),
            current_sb: read_u32_le(raw, off::CURRENT_SB),
            current_sb_len: read_u32_le(raw, off::CURRENT_SB_LEN),
            current_meta: read_u32_le(raw, off::CURRENT_META),
            spaceman_id: read_u64_le(raw, off::SPACEMAN_ID),
            omap_oid: read_u64_le(raw, off::OMAP_OID),
            reaper_oid: read_u64_le(raw, off::REAPER_OID),
            max_volumes: read_u32_le(raw, off::MAX_VOLUMES),
            volume_ids,
            keybag_block: read_u64_le(raw, off::KEYBAG_BLOCK),
            keybag_count: read_u32_le(raw, off::KEYBAG_COUNT),
        })
    }

    pub fn checkpoint_id(&self) -> u64 {
        self.header.checkpoint_id
    }

    pub fn volume_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.volume_ids.iter().copied().filter(|&id| id != 0)
    }
}

/// Read block 0, then walk the checkpoint-SB ring to find the latest valid
/// checkpoint (spec.md 4.1). `checkpoint_ago`, if non-zero, rewinds to the
/// checkpoint `latest - checkpoint_ago` instead.
pub fn locate_checkpoint<D: Device>(device: &D, checkpoint_ago: u64) -> Result<ContainerSuperblock> {
    let main_block = device.read_bytes(APFS_MSB_OFFSET, APFS_MSB_SIZE as usize)?;
    let main_sb = ContainerSuperblock::parse(&main_block, 0)?;

    let ring_len = main_sb.number_of_sb as u64;
    if ring_len == 0 {
        return Err(Error::corrupt("checkpoint ring has zero length"));
    }

    let mut hint = main_sb
        .first_sb
        .wrapping_add(main_sb.current_sb as u64)
        .wrapping_add(main_sb.current_sb_len as u64)
        .wrapping_sub(1);

    let mut best: Option<ContainerSuperblock> = None;
    let mut all_candidates: Vec<ContainerSuperblock> = Vec::new();

    for _ in 0..ring_len {
        let block_in_ring = main_sb.first_sb + ((hint - main_sb.first_sb) % ring_len);
        let raw = device.read_bytes(block_in_ring * main_sb.block_size as u64, main_sb.block_size as usize)?;
        let (header, _) = crate::libapfs::utils::decode::<ObjectHeader>(&raw)
            .map_err(|e| Error::corrupt(format!("ring entry header: {e}")))?;

        match header.block_type() {
            BlockType::SuperblockMap => {
                tracing::warn!(block = block_in_ring, "skipping SuperblockMap entry in ring scan");
                hint = block_in_ring + 1;
                continue;
            }
            BlockType::Empty => {
                if best.is_none() {
                    return Err(Error::corrupt("checkpoint ring scan found Empty before any valid superblock"));
                }
                break;
            }
            BlockType::Superblock => {
                let candidate = ContainerSuperblock::parse(&raw, block_in_ring)?;
                let better = match &best {
                    None => true,
                    Some(b) => candidate.checkpoint_id() > b.checkpoint_id(),
                };
                if !better {
                    break;
                }
                let next_hint = main_sb.first_sb + (candidate.next_sb as u64 + 1) % ring_len;
                all_candidates.push(candidate.clone());
                best = Some(candidate);
                hint = next_hint;
            }
            other => {
                return Err(Error::corrupt(format!(
                    "unexpected block type {other:?} in checkpoint ring at block {block_in_ring}"
                )));
            }
        }
    }

    let best = best.ok_or_else(|| Error::corrupt("no valid checkpoint superblock found"))?;
    if best.checkpoint_id() > main_sb.checkpoint_id() + 1 {
        return Err(Error::corrupt("checkpoint id outruns container latest + 1"));
    }

    if checkpoint_ago == 0 {
        return Ok(best);
    }

    let target = best.checkpoint_id().saturating_sub(checkpoint_ago);
    all_candidates
        .into_iter()
        .find(|c| c.checkpoint_id() == target)
        .ok_or_else(|| Error::corrupt(format!("no checkpoint {checkpoint_ago} generations back")))
}

/// One entry of the checkpoint superblock map (spec.md 3.3).
#[derive(Debug, Clone, Copy)]
pub struct SbMapEntry {
    pub block_type: u16,
    pub content_type: u16,
    pub object_id: u64,
    pub block_number: u64,
    pub size_in_bytes: u32,
}

const SB_MAP_ENTRY_SIZE: usize = 32;

#[derive(Debug, Default, Clone)]
pub struct SbMap {
    entries: Vec<SbMapEntry>,
}

impl SbMap {
    /// Read `current_sb_len - 1` consecutive blocks, wrapping the ring,
    /// preceding the checkpoint superblock (spec.md 3.3, 4.2).
    pub fn load<D: Device>(device: &D, container: &ContainerSuperblock) -> Result<Self> {
        let ring_len = container.number_of_sb as u64;
        let count = container.current_sb_len.saturating_sub(1) as u64;
        let block_size = container.block_size as u64;

        let mut entries = Vec::new();
        for i in 0..count {
            let block_in_ring =
                container.first_sb + (container.block_number + i + 1 - container.first_sb) % ring_len.max(1);
            let raw = device.read_bytes(block_in_ring * block_size, block_size as usize)?;
            let (header, _) = crate::libapfs::utils::decode::<ObjectHeader>(&raw)
                .map_err(|e| Error::corrupt(format!("sb map block header: {e}")))?;
            if header.block_type() != BlockType::SuperblockMap {
                continue;
            }
            let count_in_block = read_u32_le(&raw, ObjectHeader::SIZE) as usize;
            let base = ObjectHeader::SIZE + 8;
            for j in 0..count_in_block {
                let off = base + j * SB_MAP_ENTRY_SIZE;
                if off + SB_MAP_ENTRY_SIZE > raw.len() {
                    return Err(Error::corrupt("sb map entry runs past block end"));
                }
                entries.push(SbMapEntry {
                    block_type: read_u32_le(&raw, off) as u16,
                    content_type: (read_u32_le(&raw, off) >> 16) as u16,
                    object_id: read_u64_le(&raw, off + 8),
                    block_number: read_u64_le(&raw, off + 16),
                    size_in_bytes: read_u32_le(&raw, off + 24),
                });
            }
        }
        Ok(SbMap { entries })
    }

    /// Lookup by `(object_id, expected_type)` (spec.md 4.2).
    pub fn lookup(&self, object_id: u64, expected_type: u16) -> Result<(u64, u32)> {
        match self.entries.iter().find(|e| e.object_id == object_id) {
            None => Err(Error::not_found(format!("object {object_id} not in sb map"))),
            Some(e) if e.block_type != expected_type => Err(Error::corrupt(format!(
                "object {object_id} has type {}, expected {expected_type}",
                e.block_type
            ))),
            Some(e) => Ok((e.block_number, e.size_in_bytes)),
        }
    }
}
