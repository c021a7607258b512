//! Raw directory-entry ABI bindings and record parsing.
//!
//! One record layout is defined per supported syscall ABI and the parser
//! always advances by each record's own `d_reclen`, never a fixed stride.
//!
//! On Darwin the default linkage of `getdirentries` resolves to the
//! `$INODE64` variant on 64-bit-inode builds, which silently changes the
//! record shape. This module binds the historical symbol explicitly and
//! parses the legacy 32-bit-inode layout, so behavior does not depend on
//! which ABI the surrounding build environment defaults to.

use std::ffi::CString;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

/// `linux_dirent64`, as filled by `getdents64(2)`. The name field follows
/// the fixed header, NUL-terminated, inside the record's `d_reclen` span.
#[cfg(target_os = "linux")]
#[repr(C)]
#[allow(dead_code)]
struct RawDirent {
    d_ino: u64,
    d_off: i64,
    d_reclen: u16,
    d_type: u8,
    d_name: [u8; 0],
}

/// The legacy 32-bit-inode `dirent` filled by the historical
/// `getdirentries` entry point on Darwin.
#[cfg(target_os = "macos")]
#[repr(C)]
#[allow(dead_code)]
struct RawDirent {
    d_ino: u32,
    d_reclen: u16,
    d_type: u8,
    d_namlen: u8,
    d_name: [u8; 0],
}

const RECLEN_OFFSET: usize = mem::offset_of!(RawDirent, d_reclen);
const NAME_OFFSET: usize = mem::offset_of!(RawDirent, d_name);

#[cfg(target_os = "macos")]
extern "C" {
    // The unsuffixed symbol is the historical 32-bit-inode entry point;
    // plain linkage would resolve to getdirentries$INODE64 instead.
    #[link_name = "getdirentries"]
    fn legacy_getdirentries(
        fd: libc::c_int,
        buf: *mut libc::c_char,
        nbytes: libc::c_int,
        basep: *mut libc::c_long,
    ) -> libc::c_int;
}

/// An open directory descriptor plus the read-position state the bulk
/// syscall needs. The descriptor is closed on drop, which covers every exit
/// path of a listing.
pub(crate) struct DirHandle {
    fd: OwnedFd,
    #[cfg(target_os = "macos")]
    base: libc::c_long,
}

impl DirHandle {
    pub(crate) fn open(path: &Path) -> io::Result<DirHandle> {
        let cpath = CString::new(path.as_os_str().as_bytes()).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "path contains an interior NUL")
        })?;

        let fd = unsafe {
            libc::open(
                cpath.as_ptr(),
                libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(DirHandle {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
            #[cfg(target_os = "macos")]
            base: 0,
        })
    }

    /// Fill `buf` with raw directory-entry records. Returns the number of
    /// bytes written, `0` at end of stream, or a negative value on error
    /// with `errno` set.
    #[cfg(target_os = "linux")]
    pub(crate) fn fill(&mut self, buf: &mut [u8]) -> isize {
        unsafe {
            libc::syscall(
                libc::SYS_getdents64,
                self.fd.as_raw_fd(),
                buf.as_mut_ptr(),
                buf.len(),
            ) as isize
        }
    }

    #[cfg(target_os = "macos")]
    pub(crate) fn fill(&mut self, buf: &mut [u8]) -> isize {
        unsafe {
            legacy_getdirentries(
                self.fd.as_raw_fd(),
                buf.as_mut_ptr().cast(),
                buf.len() as libc::c_int,
                &mut self.base,
            ) as isize
        }
    }

    /// `fstatat` relative to this directory, never following symlinks.
    /// `name` must point at a NUL-terminated byte string.
    pub(crate) fn stat_entry(&self, name: *const libc::c_char) -> Option<libc::stat> {
        let mut st = unsafe { mem::zeroed::<libc::stat>() };

        let rc = unsafe {
            libc::fstatat(self.fd.as_raw_fd(), name, &mut st, libc::AT_SYMLINK_NOFOLLOW)
        };

        (rc == 0).then_some(st)
    }
}

/// Walks the variable-length records in one filled dirent buffer.
pub(crate) struct DirentBuf<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> DirentBuf<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> DirentBuf<'a> {
        DirentBuf { buf, pos: 0 }
    }
}

impl<'a> Iterator for DirentBuf<'a> {
    type Item = RawEntry<'a>;

    fn next(&mut self) -> Option<RawEntry<'a>> {
        loop {
            if self.pos + NAME_OFFSET > self.buf.len() {
                return None;
            }

            let rec = &self.buf[self.pos..];
            let reclen =
                u16::from_ne_bytes([rec[RECLEN_OFFSET], rec[RECLEN_OFFSET + 1]]) as usize;

            // A zero or short reclen cannot advance the cursor; a reclen
            // past the buffer end means a torn record. Stop either way.
            if reclen <= NAME_OFFSET || reclen > rec.len() {
                return None;
            }

            let name_area = &rec[NAME_OFFSET..reclen];
            self.pos += reclen;

            // Records whose name field carries no terminator are malformed
            // and dropped rather than read past their bounds.
            match name_area.iter().position(|&b| b == 0) {
                Some(len) => return Some(RawEntry { raw: &name_area[..=len] }),
                None => continue,
            }
        }
    }
}

/// One raw entry's name field, including its NUL terminator.
pub(crate) struct RawEntry<'a> {
    raw: &'a [u8],
}

impl RawEntry<'_> {
    /// The entry name without its terminator. Empty for records whose name
    /// begins with a NUL byte.
    pub(crate) fn name(&self) -> &[u8] {
        &self.raw[..self.raw.len() - 1]
    }

    /// Pointer to the NUL-terminated name, valid while the source buffer is
    /// borrowed, suitable for passing straight back into the libc.
    pub(crate) fn name_ptr(&self) -> *const libc::c_char {
        self.raw.as_ptr().cast()
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    // Builds one linux_dirent64 record with the given name and padding.
    fn push_record(buf: &mut Vec<u8>, ino: u64, name: &[u8], pad: usize) {
        let reclen = (NAME_OFFSET + name.len() + 1 + pad) as u16;
        buf.extend_from_slice(&ino.to_ne_bytes());
        buf.extend_from_slice(&0i64.to_ne_bytes());
        buf.extend_from_slice(&reclen.to_ne_bytes());
        buf.push(libc::DT_UNKNOWN);
        buf.extend_from_slice(name);
        buf.push(0);
        buf.extend(std::iter::repeat(0).take(pad));
    }

    #[test]
    fn walks_variable_length_records() {
        let mut buf = Vec::new();
        push_record(&mut buf, 1, b"short", 0);
        push_record(&mut buf, 2, b"a-much-longer-entry-name", 5);
        push_record(&mut buf, 3, b"x", 2);

        let names: Vec<Vec<u8>> = DirentBuf::new(&buf).map(|e| e.name().to_vec()).collect();
        assert_eq!(
            names,
            vec![
                b"short".to_vec(),
                b"a-much-longer-entry-name".to_vec(),
                b"x".to_vec()
            ]
        );
    }

    #[test]
    fn name_ptr_is_nul_terminated() {
        let mut buf = Vec::new();
        push_record(&mut buf, 1, b"entry", 3);

        let entry = DirentBuf::new(&buf).next().unwrap();
        let len = unsafe { libc::strlen(entry.name_ptr()) };
        assert_eq!(len, 5);
    }

    #[test]
    fn stops_on_zero_reclen() {
        let mut buf = Vec::new();
        push_record(&mut buf, 1, b"ok", 0);
        // A trailing header-sized run of zeroes must not loop forever.
        buf.extend(std::iter::repeat(0).take(NAME_OFFSET + 4));

        assert_eq!(DirentBuf::new(&buf).count(), 1);
    }

    #[test]
    fn stops_on_torn_record() {
        let mut buf = Vec::new();
        push_record(&mut buf, 1, b"whole", 0);
        push_record(&mut buf, 2, b"torn-off-the-end", 0);
        buf.truncate(buf.len() - 6);

        assert_eq!(DirentBuf::new(&buf).count(), 1);
    }

    #[test]
    fn drops_unterminated_name() {
        let mut buf = Vec::new();
        // reclen covers the name exactly, with no room for a terminator.
        let name = b"bad";
        let reclen = (NAME_OFFSET + name.len()) as u16;
        buf.extend_from_slice(&7u64.to_ne_bytes());
        buf.extend_from_slice(&0i64.to_ne_bytes());
        buf.extend_from_slice(&reclen.to_ne_bytes());
        buf.push(libc::DT_UNKNOWN);
        buf.extend_from_slice(name);
        push_record(&mut buf, 8, b"good", 0);

        let names: Vec<Vec<u8>> = DirentBuf::new(&buf).map(|e| e.name().to_vec()).collect();
        assert_eq!(names, vec![b"good".to_vec()]);
    }
}
