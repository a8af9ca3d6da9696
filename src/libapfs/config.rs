//! Mount-time configuration (spec.md 6.5). Grounded on the teacher's
//! `main.rs` `-o` option list, reshaped as a plain struct since there is no
//! FUSE `-o` string to parse in this core.

use crate::libapfs::definitions::APFS_MAX_SUBVOLUMES;

/// Options recognized at mount time (spec.md 6.5).
#[derive(Debug, Clone)]
pub struct MountOptions {
    /// Synthesize `/Ufsd_Volumes` and mount every volume in the container
    /// (spec.md 4.14).
    pub mount_all_volumes: bool,
    /// Tolerate a backing device shorter than the superblock's recorded
    /// total block count.
    pub ignore_block_device_size_mismatch: bool,
    /// Rewind the mount to the checkpoint `latest - checkpoint_ago`
    /// (spec.md 4.1).
    pub checkpoint_ago: u64,
    /// Per-volume password, indexed the same way as the container's volume
    /// id array.
    pub passwords: Vec<Option<String>>,
}

impl Default for MountOptions {
    fn default() -> Self {
        MountOptions {
            mount_all_volumes: false,
            ignore_block_device_size_mismatch: false,
            checkpoint_ago: 0,
            passwords: vec![None; APFS_MAX_SUBVOLUMES],
        }
    }
}

impl MountOptions {
    pub fn password_for(&self, volume_index: usize) -> Option<&str> {
        self.passwords.get(volume_index)?.as_deref()
    }
}

/// Install a `tracing-subscriber` formatter honoring `RUST_LOG`, the same
/// ambient logging setup the teacher's `main.rs` wires for its mount
/// command.
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_ansi(true)
        .try_init();
}
