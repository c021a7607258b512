//! Low-level filesystem metadata primitives for Unix.
//!
//! Use [read_dir][read_dir] for bulk directory listings backed by raw
//! `getdents`-family syscalls, [Arena][Arena] for transient bump-allocated
//! scratch memory, and [volumes][volumes] (Linux) for mounted-volume
//! capacity statistics.

mod arena;
mod dirent;
mod scan;
#[cfg(target_os = "linux")]
mod volume;

pub use arena::{Arena, ArenaAllocError};
pub use scan::{read_dir, FileRecord, ScanError, NAME_LEN};
#[cfg(target_os = "linux")]
pub use volume::{volumes, VolumeInfo, VolumeList};
