//! End-to-end mount test against a hand-built container image exercising
//! spec.md 8.4 scenario 1: locate the checkpoint, mount volume 0, list the
//! root directory, stat a symlink, and follow it.
//!
//! This is a black-box test against the crate's public surface only, so
//! every on-disk constant comes from `util` (a literal mirror of
//! `libapfs::definitions`, which is private) rather than an import.

use apfs_core::{mount, DirCursor, MemDevice, MountOptions};

mod util {
    include!("util.rs");
}
use util::*;

/// Builds an 8-block (32768-byte) container image with one unencrypted
/// volume "TestVolume" containing a root directory and one symlink "link"
/// pointing at "/hello".
///
/// Block layout:
///   0: container superblock (ring length 2, omap_oid = 0x100)
///   1: container superblock map (0x100 -> root node at block 2)
///   2: container object map root (0x200 -> block 3, 0x201 -> block 4)
///   3: volume superblock (root_tree_oid = 0x600, omap_oid = 0x201)
///   4: volume object map root (0x600 -> block 5)
///   5: Files-tree root: root dir inode(2), dirent "link", symlink inode(16),
///      symlink-target attribute
///   6, 7: unused
fn build_image() -> Vec<u8> {
    let mut image = vec![0u8; BLOCK_SIZE * 8];

    // Block 0: container superblock.
    {
        let b = &mut image[0 * BLOCK_SIZE..1 * BLOCK_SIZE];
        write_object_header(b, 1, 1, TYPE_SUPERBLOCK, CONTENT_EMPTY);
        w32(b, 32, NX_MAGIC);
        w32(b, 36, BLOCK_SIZE as u32);
        w64(b, 40, 8); // total_blocks
        w64(b, 48, 0); // features
        w64(b, 56, 0); // ro_compat
        w64(b, 64, 0); // incompat
        // uuid @72..88 left zero
        w64(b, 88, 0); // next_object_id
        w64(b, 96, 2); // next_checkpoint_id
        w32(b, 104, 2); // number_of_sb (ring length)
        w32(b, 108, 0); // number_of_meta
        w64(b, 112, 0); // first_sb
        w64(b, 120, 0); // first_meta
        w32(b, 128, 0); // next_sb
        w32(b, 132, 0); // next_meta
        w32(b, 136, 0); // current_sb
        w32(b, 140, 2); // current_sb_len
        w32(b, 144, 0); // current_meta
        w64(b, 152, 0); // spaceman_id
        w64(b, 160, 0x100); // omap_oid
        w64(b, 168, 0); // reaper_oid
        w32(b, 176, 100); // max_volumes
        w64(b, 184, 0x200); // volume_ids[0]
        // remaining volume_ids, keybag_block, keybag_count left zero
        stamp_checksum(b);
    }

    // Block 1: container superblock map, one entry mapping omap_oid 0x100
    // to the root node at block 2.
    {
        let b = &mut image[1 * BLOCK_SIZE..2 * BLOCK_SIZE];
        write_object_header(b, 2, 1, TYPE_SUPERBLOCK_MAP, CONTENT_EMPTY);
        w32(b, 32, 1); // count_in_block
        let entry = 40;
        w32(b, entry, ((CONTENT_LOCATION as u32) << 16) | TYPE_ROOT_NODE as u32);
        w64(b, entry + 8, 0x100); // object_id
        w64(b, entry + 16, 2); // block_number
        w32(b, entry + 24, BLOCK_SIZE as u32); // size_in_bytes
        stamp_checksum(b);
    }

    // Block 2: container object map root node (Location content, fixed kv),
    // two records: 0x200 -> block 3, 0x201 -> block 4.
    {
        let b = &mut image[2 * BLOCK_SIZE..3 * BLOCK_SIZE];
        write_object_header(b, 0x100, 1, TYPE_ROOT_NODE, CONTENT_LOCATION);
        w16(b, 32, FLAG_LEAF | FLAG_FIXED_KV);
        w16(b, 34, 0); // level
        w32(b, 36, 2); // record_count
        w16(b, 40, 0); // table_space_offset
        w16(b, 42, 8); // table_space_len: 2 entries * 4 bytes
        w16(b, 44, 0); // key_area_offset
        w16(b, 46, 0); // key_area_len

        let index_area_start = 64;
        let key_area_start = index_area_start + 8;
        let data_area_end = BLOCK_SIZE - 40;

        // entry 0: key_offset=0, data_offset=0
        w16(b, index_area_start, 0);
        w16(b, index_area_start + 2, 0);
        // entry 1: key_offset=16, data_offset=16
        w16(b, index_area_start + 4, 16);
        w16(b, index_area_start + 6, 16);

        // key 0: LocationKey { object_id: 0x200, checkpoint_id: 1 }
        w64(b, key_area_start, 0x200);
        w64(b, key_area_start + 8, 1);
        // key 1: LocationKey { object_id: 0x201, checkpoint_id: 1 }
        w64(b, key_area_start + 16, 0x201);
        w64(b, key_area_start + 24, 1);

        // value 0 (data_offset 0): Location { block: 3, size: 4096, flags: 0 }
        let val0_end = data_area_end;
        w64(b, val0_end - 16, 3);
        w32(b, val0_end - 8, BLOCK_SIZE as u32);
        w32(b, val0_end - 4, 0);
        // value 1 (data_offset 16): Location { block: 4, size: 4096, flags: 0 }
        let val1_end = data_area_end - 16;
        w64(b, val1_end - 16, 4);
        w32(b, val1_end - 8, BLOCK_SIZE as u32);
        w32(b, val1_end - 4, 0);

        // footer: key_size/val_size = 16/16
        let footer_base = BLOCK_SIZE - 40;
        w32(b, footer_base + 20, 16);
        w32(b, footer_base + 24, 16);

        stamp_checksum(b);
    }

    // Block 3: volume superblock.
    {
        let b = &mut image[3 * BLOCK_SIZE..4 * BLOCK_SIZE];
        write_object_header(b, 0x200, 1, TYPE_VOLUME_SUPERBLOCK, CONTENT_EMPTY);
        w32(b, 32, VSB_MAGIC);
        w64(b, 40, 0); // features
        w64(b, 48, 0); // ro_compat
        w64(b, 56, 0); // incompat
        w64(b, 64, 0x1); // vol_flags: UNENCRYPTED
        w32(b, 72, 0); // vol_role
        w64(b, 80, 0x600); // root_tree_oid
        w64(b, 88, 0); // extentref_tree_oid
        w64(b, 96, 0); // snap_meta_tree_oid
        w64(b, 104, 0x201); // omap_oid
        w64(b, 112, 0); // reaper_oid
        w64(b, 120, 0); // next_object_id
        w64(b, 128, 1); // num_files
        w64(b, 136, 1); // num_directories
        w64(b, 144, 1); // num_symlinks
        w64(b, 152, 0); // num_other
        // uuid @160..176 left zero
        let name = b"TestVolume";
        b[176..176 + name.len()].copy_from_slice(name);
        stamp_checksum(b);
    }

    // Block 4: volume object map root node, one record: 0x600 -> block 5.
    {
        let b = &mut image[4 * BLOCK_SIZE..5 * BLOCK_SIZE];
        write_object_header(b, 0x201, 1, TYPE_ROOT_NODE, CONTENT_LOCATION);
        w16(b, 32, FLAG_LEAF | FLAG_FIXED_KV);
        w16(b, 34, 0);
        w32(b, 36, 1); // record_count
        w16(b, 40, 0);
        w16(b, 42, 4); // table_space_len: 1 entry * 4 bytes
        w16(b, 44, 0);
        w16(b, 46, 0);

        let index_area_start = 64;
        let key_area_start = index_area_start + 4;
        let data_area_end = BLOCK_SIZE - 40;

        w16(b, index_area_start, 0); // key_offset
        w16(b, index_area_start + 2, 0); // data_offset

        w64(b, key_area_start, 0x600);
        w64(b, key_area_start + 8, 1);

        let val_end = data_area_end;
        w64(b, val_end - 16, 5); // Location.block
        w32(b, val_end - 8, BLOCK_SIZE as u32);
        w32(b, val_end - 4, 0);

        let footer_base = BLOCK_SIZE - 40;
        w32(b, footer_base + 20, 16);
        w32(b, footer_base + 24, 16);

        stamp_checksum(b);
    }

    // Block 5: Files-tree root (variable entries, 4 records).
    {
        let b = &mut image[5 * BLOCK_SIZE..6 * BLOCK_SIZE];
        write_object_header(b, 0x600, 1, TYPE_ROOT_NODE, CONTENT_FILES);
        w16(b, 32, FLAG_LEAF);
        w16(b, 34, 0);
        w32(b, 36, 4); // record_count
        w16(b, 40, 0);
        w16(b, 42, 32); // table_space_len: 4 entries * 8 bytes
        w16(b, 44, 0);
        w16(b, 46, 0);

        let index_area_start = 64usize;
        let key_area_start = index_area_start + 32;
        let data_area_end = BLOCK_SIZE - 40;

        // --- keys, laid out sequentially from key_area_start ---
        // R0: inode 2 (root directory)
        let key0_off = 0usize;
        let key0 = files_key_prefix(ROOT_INO, RECORD_INODE).to_le_bytes();
        b[key_area_start + key0_off..key_area_start + key0_off + 8].copy_from_slice(&key0);

        // R1: dirent (parent 2, name "link")
        let key1_off = 8usize;
        let key1_prefix = files_key_prefix(ROOT_INO, RECORD_DIR_ENTRY).to_le_bytes();
        let hash_len: u32 = 4; // name_hash=0, name_len=4
        let name1 = b"link";
        b[key_area_start + key1_off..key_area_start + key1_off + 8].copy_from_slice(&key1_prefix);
        b[key_area_start + key1_off + 8..key_area_start + key1_off + 12].copy_from_slice(&hash_len.to_le_bytes());
        b[key_area_start + key1_off + 12..key_area_start + key1_off + 16].copy_from_slice(name1);

        // R2: inode 16 (symlink)
        let key2_off = 24usize;
        let key2 = files_key_prefix(16, RECORD_INODE).to_le_bytes();
        b[key_area_start + key2_off..key_area_start + key2_off + 8].copy_from_slice(&key2);

        // R3: symlink-target attribute on inode 16
        let key3_off = 32usize;
        let key3_prefix = files_key_prefix(16, RECORD_ATTRIBUTE).to_le_bytes();
        let attr_name = b"com.apple.fs.symlink";
        b[key_area_start + key3_off..key_area_start + key3_off + 8].copy_from_slice(&key3_prefix);
        w16(b, key_area_start + key3_off + 8, attr_name.len() as u16);
        b[key_area_start + key3_off + 10..key_area_start + key3_off + 10 + attr_name.len()].copy_from_slice(attr_name);

        // index entries: (key_offset, key_size, data_offset, data_size)
        let entries = [
            (key0_off as u16, 8u16, 0u16, 100u16),
            (key1_off as u16, 16u16, 100u16, 17u16),
            (key2_off as u16, 8u16, 117u16, 100u16),
            (key3_off as u16, 30u16, 217u16, 10u16),
        ];
        for (i, (key_offset, key_size, data_offset, data_size)) in entries.iter().enumerate() {
            let entry_off = index_area_start + i * 8;
            w16(b, entry_off, *key_offset);
            w16(b, entry_off + 2, *key_size);
            w16(b, entry_off + 4, *data_offset);
            w16(b, entry_off + 6, *data_size);
        }

        // --- values, placed backward from data_area_end ---
        // value 0: root directory inode (data_offset 0 -> ends at data_area_end)
        let val0_end = data_area_end;
        let mut inode0 = [0u8; 100];
        write_inode_record(&mut inode0, ROOT_PARENT_INO, ROOT_INO, S_IFDIR | 0o755, 1, 0);
        b[val0_end - 100..val0_end].copy_from_slice(&inode0);

        // value 1: dirent value (data_offset 100)
        let val1_end = data_area_end - 100;
        w64(b, val1_end - 17, 16); // target_id
        w64(b, val1_end - 9, 0); // timestamp
        b[val1_end - 1] = 10; // entry_type (DT_LNK)

        // value 2: symlink inode (data_offset 117)
        let val2_end = data_area_end - 117;
        let mut inode2 = [0u8; 100];
        write_inode_record(&mut inode2, ROOT_INO, 16, S_IFLNK | 0o777, 1, 0);
        b[val2_end - 100..val2_end].copy_from_slice(&inode2);

        // value 3: inline symlink-target attribute (data_offset 217)
        let val3_end = data_area_end - 217;
        w16(b, val3_end - 10, 0); // APFS_XATTR_TYPE_INLINE
        w16(b, val3_end - 8, 6); // inline length
        b[val3_end - 6..val3_end].copy_from_slice(b"/hello");

        stamp_checksum(b);
    }

    // Blocks 6, 7 left as zeroed, unused space.
    image
}

#[test]
fn mounts_and_walks_root_directory() {
    let image = build_image();
    let mnt = mount(MemDevice::new(image), MountOptions::default()).expect("mount should succeed");

    let volumes = mnt.volumes();
    assert_eq!(volumes.len(), 1);
    assert_eq!(volumes[0].name, "TestVolume");
    assert!(!volumes[0].encrypted);
    assert!(volumes[0].can_decrypt);

    let root = mnt.root_inode();
    let info = root.stat().expect("stat root");
    assert!(info.is_dir);
    assert_eq!(info.mode & 0o777, 0o755);
    assert_eq!(info.size, 0);

    let mut cursor = DirCursor::new();
    let mut names = Vec::new();
    while let Some(entry) = root.readdir(&mut cursor).expect("readdir") {
        names.push((entry.name, entry.target_id));
    }
    assert_eq!(names.len(), 3);
    assert_eq!(names[0].0, ".");
    assert_eq!(names[1].0, "..");
    assert_eq!(names[2].0, "link");
    let link_id = names[2].1;

    let link = mnt.open_inode(link_id);
    let link_info = link.stat().expect("stat symlink");
    assert!(link_info.is_symlink);
    assert!(!link_info.is_dir);
    assert_eq!(link_info.mode & 0o777, 0o777);
    assert_eq!(link_info.size, 6);

    let mut buf = [0u8; 6];
    let n = link.readlink(&mut buf).expect("readlink");
    assert_eq!(n, 6);
    assert_eq!(&buf, b"/hello");
}

/// Builds a second 10-block image whose single regular file spans two
/// extents on two non-adjacent physical blocks, to exercise the
/// extent-resolver boundary crossing (spec.md 8.4 scenario 8.3): reading
/// across `file_offset = 4096` must land on the second extent's
/// `start_block`, not silently keep re-reading the first one.
///
/// Block layout mirrors `build_image`'s container/volume scaffolding;
/// block 5's Files tree holds the root directory, one dirent ("file.bin"),
/// the file's inode, and its two extent records. Blocks 8 and 9 are the
/// extents' physical data, filled with distinct byte patterns so a wrong
/// extent (or a wrong in-block offset) reads back as the wrong pattern.
fn build_extent_image() -> Vec<u8> {
    let mut image = vec![0u8; BLOCK_SIZE * 10];

    {
        let b = &mut image[0 * BLOCK_SIZE..1 * BLOCK_SIZE];
        write_object_header(b, 1, 1, TYPE_SUPERBLOCK, CONTENT_EMPTY);
        w32(b, 32, NX_MAGIC);
        w32(b, 36, BLOCK_SIZE as u32);
        w64(b, 40, 10); // total_blocks
        w64(b, 88, 0);
        w64(b, 96, 2);
        w32(b, 104, 2);
        w32(b, 140, 2);
        w64(b, 160, 0x100);
        w32(b, 176, 100);
        w64(b, 184, 0x200);
        stamp_checksum(b);
    }

    {
        let b = &mut image[1 * BLOCK_SIZE..2 * BLOCK_SIZE];
        write_object_header(b, 2, 1, TYPE_SUPERBLOCK_MAP, CONTENT_EMPTY);
        w32(b, 32, 1);
        let entry = 40;
        w32(b, entry, ((CONTENT_LOCATION as u32) << 16) | TYPE_ROOT_NODE as u32);
        w64(b, entry + 8, 0x100);
        w64(b, entry + 16, 2);
        w32(b, entry + 24, BLOCK_SIZE as u32);
        stamp_checksum(b);
    }

    {
        let b = &mut image[2 * BLOCK_SIZE..3 * BLOCK_SIZE];
        write_object_header(b, 0x100, 1, TYPE_ROOT_NODE, CONTENT_LOCATION);
        w16(b, 32, FLAG_LEAF | FLAG_FIXED_KV);
        w16(b, 34, 0);
        w32(b, 36, 2);
        w16(b, 40, 0);
        w16(b, 42, 8);
        w16(b, 44, 0);
        w16(b, 46, 0);

        let index_area_start = 64;
        let key_area_start = index_area_start + 8;
        let data_area_end = BLOCK_SIZE - 40;

        w16(b, index_area_start, 0);
        w16(b, index_area_start + 2, 0);
        w16(b, index_area_start + 4, 16);
        w16(b, index_area_start + 6, 16);

        w64(b, key_area_start, 0x200);
        w64(b, key_area_start + 8, 1);
        w64(b, key_area_start + 16, 0x201);
        w64(b, key_area_start + 24, 1);

        let val0_end = data_area_end;
        w64(b, val0_end - 16, 3);
        w32(b, val0_end - 8, BLOCK_SIZE as u32);
        w32(b, val0_end - 4, 0);
        let val1_end = data_area_end - 16;
        w64(b, val1_end - 16, 4);
        w32(b, val1_end - 8, BLOCK_SIZE as u32);
        w32(b, val1_end - 4, 0);

        let footer_base = BLOCK_SIZE - 40;
        w32(b, footer_base + 20, 16);
        w32(b, footer_base + 24, 16);

        stamp_checksum(b);
    }

    {
        let b = &mut image[3 * BLOCK_SIZE..4 * BLOCK_SIZE];
        write_object_header(b, 0x200, 1, TYPE_VOLUME_SUPERBLOCK, CONTENT_EMPTY);
        w32(b, 32, VSB_MAGIC);
        w64(b, 64, 0x1); // vol_flags: UNENCRYPTED
        w64(b, 80, 0x600); // root_tree_oid
        w64(b, 104, 0x201); // omap_oid
        w64(b, 128, 1); // num_files
        w64(b, 136, 1); // num_directories
        let name = b"ExtentVolume";
        b[176..176 + name.len()].copy_from_slice(name);
        stamp_checksum(b);
    }

    {
        let b = &mut image[4 * BLOCK_SIZE..5 * BLOCK_SIZE];
        write_object_header(b, 0x201, 1, TYPE_ROOT_NODE, CONTENT_LOCATION);
        w16(b, 32, FLAG_LEAF | FLAG_FIXED_KV);
        w16(b, 34, 0);
        w32(b, 36, 1);
        w16(b, 40, 0);
        w16(b, 42, 4);
        w16(b, 44, 0);
        w16(b, 46, 0);

        let index_area_start = 64;
        let key_area_start = index_area_start + 4;
        let data_area_end = BLOCK_SIZE - 40;

        w16(b, index_area_start, 0);
        w16(b, index_area_start + 2, 0);

        w64(b, key_area_start, 0x600);
        w64(b, key_area_start + 8, 1);

        let val_end = data_area_end;
        w64(b, val_end - 16, 5); // Location.block
        w32(b, val_end - 8, BLOCK_SIZE as u32);
        w32(b, val_end - 4, 0);

        let footer_base = BLOCK_SIZE - 40;
        w32(b, footer_base + 20, 16);
        w32(b, footer_base + 24, 16);

        stamp_checksum(b);
    }

    // Block 5: Files-tree root -- root dir inode(2), dirent("file.bin"),
    // inode(17) regular file (8192 bytes), and its two 4096-byte extents
    // on physical blocks 8 and 9.
    {
        let b = &mut image[5 * BLOCK_SIZE..6 * BLOCK_SIZE];
        write_object_header(b, 0x600, 1, TYPE_ROOT_NODE, CONTENT_FILES);
        w16(b, 32, FLAG_LEAF);
        w16(b, 34, 0);
        w32(b, 36, 5); // record_count
        w16(b, 40, 0);
        w16(b, 42, 40); // table_space_len: 5 entries * 8 bytes
        w16(b, 44, 0);
        w16(b, 46, 0);

        let index_area_start = 64usize;
        let key_area_start = index_area_start + 40;
        let data_area_end = BLOCK_SIZE - 40;

        // R0: inode 2 (root directory)
        let key0_off = 0usize;
        let key0 = files_key_prefix(ROOT_INO, RECORD_INODE).to_le_bytes();
        b[key_area_start + key0_off..key_area_start + key0_off + 8].copy_from_slice(&key0);

        // R1: dirent (parent 2, name "file.bin") -> inode 17
        let key1_off = 8usize;
        let key1_prefix = files_key_prefix(ROOT_INO, RECORD_DIR_ENTRY).to_le_bytes();
        let hash_len: u32 = 8; // name_hash=0, name_len=8
        let name1 = b"file.bin";
        b[key_area_start + key1_off..key_area_start + key1_off + 8].copy_from_slice(&key1_prefix);
        b[key_area_start + key1_off + 8..key_area_start + key1_off + 12].copy_from_slice(&hash_len.to_le_bytes());
        b[key_area_start + key1_off + 12..key_area_start + key1_off + 20].copy_from_slice(name1);

        // R2: inode 17 (regular file)
        let key2_off = 28usize;
        let key2 = files_key_prefix(17, RECORD_INODE).to_le_bytes();
        b[key_area_start + key2_off..key_area_start + key2_off + 8].copy_from_slice(&key2);

        // R3: extent (owner 17, file_offset 0)
        let key3_off = 36usize;
        let key3_prefix = files_key_prefix(17, RECORD_EXTENT).to_le_bytes();
        b[key_area_start + key3_off..key_area_start + key3_off + 8].copy_from_slice(&key3_prefix);
        w64(b, key_area_start + key3_off + 8, 0);

        // R4: extent (owner 17, file_offset 4096)
        let key4_off = 52usize;
        let key4_prefix = files_key_prefix(17, RECORD_EXTENT).to_le_bytes();
        b[key_area_start + key4_off..key_area_start + key4_off + 8].copy_from_slice(&key4_prefix);
        w64(b, key_area_start + key4_off + 8, BLOCK_SIZE as u64);

        let entries = [
            (key0_off as u16, 8u16, 0u16, 100u16),
            (key1_off as u16, 20u16, 100u16, 17u16),
            (key2_off as u16, 8u16, 117u16, 100u16),
            (key3_off as u16, 16u16, 217u16, 24u16),
            (key4_off as u16, 16u16, 241u16, 24u16),
        ];
        for (i, (key_offset, key_size, data_offset, data_size)) in entries.iter().enumerate() {
            let entry_off = index_area_start + i * 8;
            w16(b, entry_off, *key_offset);
            w16(b, entry_off + 2, *key_size);
            w16(b, entry_off + 4, *data_offset);
            w16(b, entry_off + 6, *data_size);
        }

        // value 0: root directory inode (data_offset 0)
        let val0_end = data_area_end;
        let mut inode0 = [0u8; 100];
        write_inode_record(&mut inode0, ROOT_PARENT_INO, ROOT_INO, S_IFDIR | 0o755, 1, 0);
        b[val0_end - 100..val0_end].copy_from_slice(&inode0);

        // value 1: dirent value (data_offset 100)
        let val1_end = data_area_end - 100;
        w64(b, val1_end - 17, 17); // target_id
        w64(b, val1_end - 9, 0); // timestamp
        b[val1_end - 1] = 8; // entry_type (DT_REG)

        // value 2: regular-file inode (data_offset 117)
        let val2_end = data_area_end - 117;
        let mut inode2 = [0u8; 100];
        write_inode_record(&mut inode2, ROOT_INO, 17, S_IFREG | 0o644, 1, 2 * BLOCK_SIZE as u64);
        b[val2_end - 100..val2_end].copy_from_slice(&inode2);

        // value 3: extent 0 -- [0, 4096) -> physical block 8 (data_offset 217)
        let val3_end = data_area_end - 217;
        w64(b, val3_end - 24, BLOCK_SIZE as u64); // size
        w64(b, val3_end - 16, 8); // start_block
        w64(b, val3_end - 8, 0); // crypto_id

        // value 4: extent 1 -- [4096, 8192) -> physical block 9 (data_offset 241)
        let val4_end = data_area_end - 241;
        w64(b, val4_end - 24, BLOCK_SIZE as u64); // size
        w64(b, val4_end - 16, 9); // start_block
        w64(b, val4_end - 8, 0); // crypto_id

        stamp_checksum(b);
    }

    // Blocks 6, 7 unused; blocks 8 and 9 hold the two extents' content.
    image[8 * BLOCK_SIZE..9 * BLOCK_SIZE].fill(0xAA);
    image[9 * BLOCK_SIZE..10 * BLOCK_SIZE].fill(0xBB);

    image
}

#[test]
fn reads_a_file_data_across_an_extent_boundary() {
    let image = build_extent_image();
    let mnt = mount(MemDevice::new(image), MountOptions::default()).expect("mount should succeed");

    let root = mnt.root_inode();
    let mut cursor = DirCursor::new();
    let mut file_id = None;
    while let Some(entry) = root.readdir(&mut cursor).expect("readdir") {
        if entry.name == "file.bin" {
            file_id = Some(entry.target_id);
        }
    }
    let file = mnt.open_inode(file_id.expect("file.bin should be listed"));
    let info = file.stat().expect("stat file");
    assert_eq!(info.size, 2 * BLOCK_SIZE as u64);

    // Read straddling the extent boundary at byte 4096: the first half must
    // come from physical block 8 (0xAA) and the second half from physical
    // block 9 (0xBB).
    let mut buf = vec![0u8; 64];
    let n = file.read(BLOCK_SIZE as u64 - 32, &mut buf).expect("read across extent boundary");
    assert_eq!(n, 64);
    assert!(buf[..32].iter().all(|&b| b == 0xAA));
    assert!(buf[32..].iter().all(|&b| b == 0xBB));

    // A read fully inside the second extent must also land on block 9.
    let mut tail = vec![0u8; 16];
    let n = file.read(2 * BLOCK_SIZE as u64 - 16, &mut tail).expect("read tail of second extent");
    assert_eq!(n, 16);
    assert!(tail.iter().all(|&b| b == 0xBB));
}

#[test]
fn rejects_bad_magic() {
    let mut image = build_image();
    // Corrupt the container magic without restamping the checksum.
    image[32] ^= 0xFF;
    let err = mount(MemDevice::new(image), MountOptions::default()).unwrap_err();
    assert!(err.to_string().contains("magic") || err.to_string().contains("fletcher64") || err.to_string().contains("corrupt"));
}
