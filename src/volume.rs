//! Mounted-volume discovery and capacity statistics (Linux).
//!
//! Reads the kernel mount table, drops pseudo-filesystems and duplicate
//! mounts of the same device, and fills per-volume capacity figures via
//! `statfs(2)`.

use std::collections::HashMap;
use std::ffi::CString;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::mem;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

const MOUNT_TABLE: &str = "/proc/self/mounts";

// Superblock magics from linux/magic.h. Defined here rather than taken from
// libc because several of them never made it into the libc crate.
const CGROUP_SUPER_MAGIC: i64 = 0x0027e0eb;
const CGROUP2_SUPER_MAGIC: i64 = 0x63677270;
const SYSFS_MAGIC: i64 = 0x62656572;
const OVERLAYFS_SUPER_MAGIC: i64 = 0x794c7630;
const TMPFS_MAGIC: i64 = 0x01021994;
const DEBUGFS_MAGIC: i64 = 0x64626720;
const SQUASHFS_MAGIC: i64 = 0x73717368;
const PROC_SUPER_MAGIC: i64 = 0x00009fa0;
const SECURITYFS_MAGIC: i64 = 0x73636673;

const EXT4_SUPER_MAGIC: i64 = 0x0000ef53;
const XFS_SUPER_MAGIC: i64 = 0x58465342;
const BTRFS_SUPER_MAGIC: i64 = 0x9123683e;
const NFS_SUPER_MAGIC: i64 = 0x00006969;
const MSDOS_SUPER_MAGIC: i64 = 0x00004d44;
const V9FS_MAGIC: i64 = 0x01021997;
const NTFS_SB_MAGIC: i64 = 0x5346544e;

const EXCLUDED_FS_MAGICS: &[i64] = &[
    CGROUP_SUPER_MAGIC,
    CGROUP2_SUPER_MAGIC,
    SYSFS_MAGIC,
    OVERLAYFS_SUPER_MAGIC,
    TMPFS_MAGIC,
    DEBUGFS_MAGIC,
    SQUASHFS_MAGIC,
    PROC_SUPER_MAGIC,
    SECURITYFS_MAGIC,
];

fn fs_name(magic: i64) -> &'static str {
    match magic {
        EXT4_SUPER_MAGIC => "ext4",
        XFS_SUPER_MAGIC => "xfs",
        BTRFS_SUPER_MAGIC => "btrfs",
        NFS_SUPER_MAGIC => "nfs",
        MSDOS_SUPER_MAGIC => "msdos",
        V9FS_MAGIC => "v9",
        NTFS_SB_MAGIC => "ntfs",
        _ => "",
    }
}

/// Capacity statistics for a single mounted volume.
#[derive(Debug, Clone)]
pub struct VolumeInfo {
    pub path: PathBuf,
    pub fs_name: &'static str,
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub used_bytes: u64,
    pub used_percent: f64,
}

/// Every real mounted volume, with aggregate totals.
#[derive(Debug, Default)]
pub struct VolumeList {
    volumes: HashMap<PathBuf, VolumeInfo>,
    pub total_capacity: u64,
    pub total_free: u64,
    pub total_used: u64,
}

impl VolumeList {
    pub fn all(&self) -> &HashMap<PathBuf, VolumeInfo> {
        &self.volumes
    }

    pub fn find<P: AsRef<Path>>(&self, path: P) -> Option<&VolumeInfo> {
        self.volumes.get(path.as_ref())
    }
}

/// Enumerate mounted real filesystems with capacity figures.
///
/// Pseudo-filesystems (proc, sysfs, cgroups and friends) and zero-block
/// mounts are excluded. Per-mount `statfs` failures, which are mostly
/// permission problems, skip that mount rather than failing the whole
/// enumeration; only an unreadable mount table is an error.
pub fn volumes() -> io::Result<VolumeList> {
    let mounts = mount_points(BufReader::new(File::open(MOUNT_TABLE)?));

    let mut list = VolumeList::default();

    for mount in mounts {
        let info = match volume_info(&mount) {
            Ok(Some(info)) => info,
            Ok(None) => continue,
            Err(err) => {
                tracing::debug!(mount = %mount.display(), error = %err, "statfs skipped");
                continue;
            }
        };

        list.total_capacity += info.total_bytes;
        list.total_free += info.free_bytes;
        list.total_used += info.used_bytes;
        list.volumes.insert(mount, info);
    }

    Ok(list)
}

/// Mount points from the mount table, deduplicated by backing device so a
/// device mounted in several places (bind mounts, btrfs subvolumes) is
/// counted once, under its shortest mount path.
fn mount_points<R: BufRead>(table: R) -> Vec<PathBuf> {
    let mut by_device: HashMap<String, Vec<String>> = HashMap::new();

    for line in table.lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };

        let (device, mount) = match parse_mount_line(&line) {
            Some(fields) => fields,
            None => continue,
        };

        let ino = match std::fs::metadata(mount) {
            Ok(meta) => meta.ino(),
            // Mostly permission errors; nothing useful to salvage here.
            Err(_) => continue,
        };

        by_device
            .entry(format!("{device}{ino}"))
            .or_default()
            .push(mount.to_string());
    }

    by_device
        .into_values()
        .filter_map(|mounts| mounts.into_iter().min_by_key(String::len))
        .map(PathBuf::from)
        .collect()
}

/// Splits one mount-table line into device and mount point. Lines with
/// fewer than two fields or a device that is not a path are not mounts of
/// interest.
fn parse_mount_line(line: &str) -> Option<(&str, &str)> {
    let mut fields = line.split(' ');
    let device = fields.next()?;
    let mount = fields.next()?;

    if !device.starts_with('/') {
        return None;
    }

    Some((device, mount))
}

fn volume_info(mount: &Path) -> io::Result<Option<VolumeInfo>> {
    let cpath = CString::new(mount.as_os_str().as_bytes()).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, "path contains an interior NUL")
    })?;

    let mut stat = unsafe { mem::zeroed::<libc::statfs>() };
    if unsafe { libc::statfs(cpath.as_ptr(), &mut stat) } != 0 {
        return Err(io::Error::last_os_error());
    }

    let magic = stat.f_type as i64;
    if EXCLUDED_FS_MAGICS.contains(&magic) || stat.f_blocks == 0 {
        return Ok(None);
    }

    let block_size = stat.f_bsize as u64;
    let used_blocks = stat.f_blocks - stat.f_bfree;

    Ok(Some(VolumeInfo {
        path: mount.to_path_buf(),
        fs_name: fs_name(magic),
        total_bytes: stat.f_blocks * block_size,
        free_bytes: stat.f_bfree * block_size,
        used_bytes: used_blocks * block_size,
        used_percent: (used_blocks as f64 / stat.f_blocks as f64) * 100.0,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_line_parsing() {
        assert_eq!(
            parse_mount_line("/dev/sda1 / ext4 rw,relatime 0 0"),
            Some(("/dev/sda1", "/"))
        );
        // Special filesystems have non-path devices.
        assert_eq!(parse_mount_line("proc /proc proc rw 0 0"), None);
        assert_eq!(parse_mount_line("incomplete"), None);
        assert_eq!(parse_mount_line(""), None);
    }

    #[test]
    fn duplicate_device_keeps_shortest_mount() {
        // "/.." resolves to the same inode as "/", standing in for a device
        // mounted at two places.
        let table = "/dev/sda1 /.. ext4 rw 0 0\n/dev/sda1 / ext4 rw 0 0\n";
        let mounts = mount_points(table.as_bytes());
        assert_eq!(mounts, vec![PathBuf::from("/")]);
    }

    #[test]
    fn same_mount_twice_collapses() {
        let table = "/dev/sda1 / ext4 rw 0 0\n/dev/sda1 / ext4 rw 0 0\n";
        let mounts = mount_points(table.as_bytes());
        assert_eq!(mounts, vec![PathBuf::from("/")]);
    }

    #[test]
    fn root_volume_has_capacity() {
        let info = volume_info(Path::new("/")).unwrap();
        // "/" is a real filesystem everywhere we build.
        let info = info.expect("root filesystem excluded");
        assert!(info.total_bytes > 0);
        assert!(info.used_bytes <= info.total_bytes);
        assert!(info.used_percent >= 0.0 && info.used_percent <= 100.0);
    }

    #[test]
    fn volumes_aggregates_totals() {
        let list = volumes().unwrap();
        let sum: u64 = list.all().values().map(|v| v.total_bytes).sum();
        assert_eq!(sum, list.total_capacity);
    }
}
