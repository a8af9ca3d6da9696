//! Read-only driver core for the Apple File System (APFS).
//!
//! This crate owns the on-disk format only: locating the container
//! checkpoint, walking object maps and B+-trees, decoding inodes, extents,
//! directories, extended attributes and transparent compression, and
//! unwrapping an encrypted volume's key. It has no opinion on how callers
//! expose that to the outside world (FUSE, a CLI, a library embedder) --
//! see `mount::Mount` for the one public entry point.

mod libapfs;

pub use libapfs::{
    init_logging, mount, CryptoProvider, Decompressor, Device, DirCursor, DirEntry, Error,
    FileDevice, FileInfo, InodeRef, MemDevice, Mount, MountOptions, Result, VolumeInfo,
    VolumeRole, DEFAULT_CAPACITY,
};
