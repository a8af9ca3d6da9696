mod btree;
mod cache;
mod checksum;
mod compression;
mod config;
mod container;
mod crypto;
mod definitions;
mod device;
mod directory;
mod error;
mod extent;
mod inode;
mod keybag;
mod keys;
mod location;
mod mount;
mod namehash;
mod object;
mod utils;
mod volume;
mod xattr;

pub use cache::DEFAULT_CAPACITY;
pub use compression::Decompressor;
pub use config::{init_logging, MountOptions};
pub use crypto::CryptoProvider;
pub use device::{Device, FileDevice, MemDevice};
pub use directory::DirEntry;
pub use error::{Error, Result};
pub use mount::{mount, DirCursor, FileInfo, InodeRef, Mount, VolumeInfo};
pub use volume::VolumeRole;
