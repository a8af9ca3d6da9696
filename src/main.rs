//! `apfs-dump`: a thin demo binary driving the `apfs_core` library against a
//! container image, walking the root directory tree and printing what the
//! public API reports. Grounded on the teacher's `main.rs` (clap-parsed
//! device path + mount options, then drive the library) with `fuse::mount`
//! replaced by a plain recursive `readdir`/`stat` walk to stdout, since this
//! crate has no FUSE surface.

use std::path::PathBuf;

use apfs_core::{init_logging, mount, DirCursor, FileDevice, InodeRef, Mount, MountOptions};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "apfs-dump", about = "Read-only APFS container walker")]
struct Args {
    /// Path to a raw APFS container image.
    device: PathBuf,

    /// Mount every volume in the container, exposing them under a synthetic
    /// `Ufsd_Volumes` directory (spec.md 4.14).
    #[arg(long)]
    all_volumes: bool,

    /// Tolerate a backing file shorter than the container's recorded size.
    #[arg(long)]
    ignore_size_mismatch: bool,

    /// Password for an encrypted volume, tried against every volume index.
    #[arg(long)]
    password: Option<String>,

    /// Also read and print file contents, not just metadata.
    #[arg(long)]
    cat: bool,
}

fn main() {
    init_logging();

    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("apfs-dump: {e}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> apfs_core::Result<()> {
    let device = FileDevice::open(&args.device)?;

    let mut options = MountOptions {
        mount_all_volumes: args.all_volumes,
        ignore_block_device_size_mismatch: args.ignore_size_mismatch,
        ..MountOptions::default()
    };
    if let Some(password) = &args.password {
        for slot in options.passwords.iter_mut() {
            *slot = Some(password.clone());
        }
    }

    let mnt = mount(device, options)?;

    println!("volumes:");
    for volume in mnt.volumes() {
        println!(
            "  [{}] {:?} encrypted={} can_decrypt={} files={} dirs={}",
            volume.index, volume.name, volume.encrypted, volume.can_decrypt, volume.num_files, volume.num_directories
        );
    }

    walk(&mnt, mnt.root_inode(), "/", args.cat)
}

fn walk<D: apfs_core::Device>(mnt: &Mount<D>, inode: InodeRef<'_, D>, path: &str, cat: bool) -> apfs_core::Result<()> {
    let info = inode.stat()?;
    println!("{path}\tsize={}\tmode={:#o}\tcompressed={}", info.size, info.mode, info.is_compressed);

    if info.is_symlink {
        let mut buf = vec![0u8; info.size as usize];
        let n = inode.readlink(&mut buf)?;
        println!("  -> {}", String::from_utf8_lossy(&buf[..n]));
        return Ok(());
    }

    if !info.is_dir {
        if cat {
            let mut buf = vec![0u8; info.size as usize];
            let n = inode.read(0, &mut buf)?;
            print!("{}", String::from_utf8_lossy(&buf[..n]));
        }
        return Ok(());
    }

    let mut cursor = DirCursor::new();
    while let Some(entry) = inode.readdir(&mut cursor)? {
        if entry.name == "." || entry.name == ".." {
            continue;
        }
        let child = mnt.open_inode(entry.target_id);
        let child_path = format!("{}{}{}", path, if path.ends_with('/') { "" } else { "/" }, entry.name);
        walk(mnt, child, &child_path, cat)?;
    }
    Ok(())
}
