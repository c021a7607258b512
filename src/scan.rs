//! Buffered bulk directory listing.
//!
//! [read_dir] amortizes syscall overhead by pulling many raw entry records
//! per syscall into a fixed buffer, then stats each surviving entry without
//! following symlinks. The result is a single dense `Vec<FileRecord>` whose
//! ownership transfers to the caller.

use std::borrow::Cow;
use std::collections::TryReserveError;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use crate::dirent::{DirHandle, DirentBuf};

/// Usable bytes in a record's name field; one more byte holds the NUL
/// terminator. Longer names are truncated, never overflowed.
pub const NAME_LEN: usize = 255;

const DIRENT_BUF_LEN: usize = 4096;
const INITIAL_RECORDS: usize = 64;

/// A directory listing failed. Per-entry stat failures are not errors; they
/// leave the affected record's metadata zeroed instead.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("cannot open directory `{}`", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot read entries from `{}`", path.display())]
    ReadEntries {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot grow listing past {len} records")]
    OutOfMemory {
        len: usize,
        #[source]
        source: TryReserveError,
    },
}

impl ScanError {
    /// The untranslated OS error code behind this failure, interpretable
    /// with standard errno semantics.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            ScanError::Open { source, .. } | ScanError::ReadEntries { source, .. } => {
                source.raw_os_error()
            }
            ScanError::OutOfMemory { .. } => Some(libc::ENOMEM),
        }
    }
}

/// Metadata for one directory entry.
///
/// The layout is fixed and `repr(C)`, suitable for handing across an FFI
/// boundary as-is. Metadata fields are zero when the per-entry stat failed;
/// a consumer that must distinguish "empty file" from "stat failed" has to
/// check for that pattern itself.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct FileRecord {
    name: [u8; NAME_LEN + 1],
    pub ino: u64,
    pub dev: i64,
    is_dir: i32,
    pub size: i64,
    pub mtime_sec: i64,
    pub mtime_nsec: i64,
}

impl FileRecord {
    fn zeroed() -> FileRecord {
        FileRecord {
            name: [0; NAME_LEN + 1],
            ino: 0,
            dev: 0,
            is_dir: 0,
            size: 0,
            mtime_sec: 0,
            mtime_nsec: 0,
        }
    }

    /// Truncating copy; the final byte always stays a NUL terminator.
    pub(crate) fn set_name(&mut self, name: &[u8]) {
        let len = name.len().min(NAME_LEN);
        self.name[..len].copy_from_slice(&name[..len]);
        self.name[len..].fill(0);
    }

    fn fill_stat(&mut self, st: &libc::stat) {
        self.ino = st.st_ino as u64;
        self.dev = st.st_dev as i64;
        self.is_dir = ((st.st_mode & libc::S_IFMT) == libc::S_IFDIR) as i32;
        self.size = st.st_size as i64;
        self.mtime_sec = st.st_mtime as i64;
        self.mtime_nsec = st.st_mtime_nsec as i64;
    }

    /// The entry name as raw bytes, without the terminator.
    pub fn name_bytes(&self) -> &[u8] {
        let len = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.name.len());
        &self.name[..len]
    }

    /// The entry name, lossily decoded for non-UTF-8 filenames.
    pub fn name(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.name_bytes())
    }

    #[inline(always)]
    pub fn is_dir(&self) -> bool {
        self.is_dir != 0
    }
}

impl fmt::Debug for FileRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileRecord")
            .field("name", &self.name())
            .field("ino", &self.ino)
            .field("dev", &self.dev)
            .field("is_dir", &self.is_dir())
            .field("size", &self.size)
            .field("mtime_sec", &self.mtime_sec)
            .field("mtime_nsec", &self.mtime_nsec)
            .finish()
    }
}

/// List every real entry of the directory at `path`.
///
/// `.` and `..` are excluded; other dotfiles are kept. Entries are stat'ed
/// without following symlinks, and a failed stat leaves that record's
/// metadata zeroed rather than failing the listing. Open and read failures
/// abort the whole call with the native OS error preserved; no partial
/// listing is ever returned.
pub fn read_dir<P: AsRef<Path>>(path: P) -> Result<Vec<FileRecord>, ScanError> {
    let path = path.as_ref();

    let mut handle = DirHandle::open(path).map_err(|source| ScanError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let mut records: Vec<FileRecord> = Vec::new();
    reserve(&mut records, INITIAL_RECORDS)?;

    let mut buf = [0u8; DIRENT_BUF_LEN];

    loop {
        let n = handle.fill(&mut buf);
        if n < 0 {
            return Err(ScanError::ReadEntries {
                path: path.to_path_buf(),
                source: io::Error::last_os_error(),
            });
        }
        if n == 0 {
            break;
        }

        tracing::trace!(bytes = n, "filled dirent buffer");

        for entry in DirentBuf::new(&buf[..n as usize]) {
            let name = entry.name();

            if name == b"." || name == b".." {
                continue;
            }

            // Defensive filter against malformed records: an empty name or
            // one starting with a high-bit continuation byte.
            if name.is_empty() || name[0] & 0x80 != 0 {
                continue;
            }

            if records.len() == records.capacity() {
                let additional = records.capacity();
                reserve(&mut records, additional)?;
            }

            let mut record = FileRecord::zeroed();
            record.set_name(name);

            if let Some(st) = handle.stat_entry(entry.name_ptr()) {
                record.fill_stat(&st);
            }

            records.push(record);
        }
    }

    tracing::debug!(path = %path.display(), count = records.len(), "directory listed");

    Ok(records)
}

fn reserve(records: &mut Vec<FileRecord>, additional: usize) -> Result<(), ScanError> {
    records
        .try_reserve_exact(additional)
        .map_err(|source| ScanError::OutOfMemory {
            len: records.len(),
            source,
        })
}
