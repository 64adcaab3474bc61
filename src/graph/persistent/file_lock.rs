//! Exclusive advisory lock on a graph directory.
//!
//! Only one process may own a durable graph at a time. The lock file holds
//! the owner's pid so a blocked caller can say who has it. The OS drops the
//! lock with the file handle, so a crashed owner never leaves it stuck.

use std::fs::{File, OpenOptions};
use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Name of the lock file inside a graph directory.
pub const LOCK_FILE: &str = "graph.lock";

/// Ownership of a graph directory, released on drop.
#[derive(Debug)]
pub struct DirectoryLock {
    _file: File,
    path: PathBuf,
}

impl DirectoryLock {
    /// Takes the lock on `dir` without waiting.
    ///
    /// # Errors
    /// - `ErrorKind::WouldBlock` naming the owner if the directory is taken
    /// - any error opening or writing the lock file
    pub fn acquire(dir: &Path) -> IoResult<Self> {
        let path = dir.join(LOCK_FILE);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if !sys::try_lock_exclusive(&file)? {
            let owner = match read_owner(&mut file) {
                Some(pid) => format!("process {pid}"),
                None => "another process".to_string(),
            };
            return Err(IoError::new(
                ErrorKind::WouldBlock,
                format!("graph directory {} is locked by {owner}", dir.display()),
            ));
        }

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        write!(file, "{}", std::process::id())?;
        file.sync_data()?;

        Ok(Self { _file: file, path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Pid recorded by the current owner, if readable.
fn read_owner(file: &mut File) -> Option<u32> {
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

#[cfg(unix)]
mod sys {
    use std::fs::File;
    use std::io::{Error as IoError, Result as IoResult};
    use std::os::unix::io::AsRawFd;

    /// `Ok(false)` if someone else holds the lock.
    pub fn try_lock_exclusive(file: &File) -> IoResult<bool> {
        // SAFETY: the descriptor belongs to `file`, which outlives the call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc == 0 {
            return Ok(true);
        }
        let err = IoError::last_os_error();
        if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
            Ok(false)
        } else {
            Err(err)
        }
    }
}

#[cfg(windows)]
mod sys {
    use std::fs::File;
    use std::io::{Error as IoError, Result as IoResult};
    use std::os::windows::io::AsRawHandle;

    use windows_sys::Win32::Foundation::{ERROR_LOCK_VIOLATION, HANDLE};
    use windows_sys::Win32::Storage::FileSystem::{
        LockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY,
    };
    use windows_sys::Win32::System::IO::OVERLAPPED;

    /// `Ok(false)` if someone else holds the lock.
    pub fn try_lock_exclusive(file: &File) -> IoResult<bool> {
        // SAFETY: the handle belongs to `file` and `overlapped` lives until
        // the synchronous call returns.
        let ok = unsafe {
            let mut overlapped = std::mem::zeroed::<OVERLAPPED>();
            LockFileEx(
                file.as_raw_handle() as HANDLE,
                LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
                0,
                1,
                0,
                &mut overlapped,
            )
        };
        if ok != 0 {
            return Ok(true);
        }
        let err = IoError::last_os_error();
        #[allow(clippy::cast_possible_wrap)]
        if err.raw_os_error() == Some(ERROR_LOCK_VIOLATION as i32) {
            Ok(false)
        } else {
            Err(err)
        }
    }
}

#[cfg(not(any(unix, windows)))]
mod sys {
    use std::fs::File;
    use std::io::{Error as IoError, ErrorKind, Result as IoResult};

    pub fn try_lock_exclusive(_file: &File) -> IoResult<bool> {
        Err(IoError::new(
            ErrorKind::Unsupported,
            "graph directory locking is not supported on this platform",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_owner_pid_is_recorded() {
        let dir = tempdir().unwrap();
        let lock = DirectoryLock::acquire(dir.path()).unwrap();
        let contents = std::fs::read_to_string(lock.path()).unwrap();
        assert_eq!(contents, std::process::id().to_string());
    }

    #[test]
    fn test_second_acquire_names_owner() {
        let dir = tempdir().unwrap();
        let _held = DirectoryLock::acquire(dir.path()).unwrap();

        let err = DirectoryLock::acquire(dir.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WouldBlock);
        assert!(err
            .to_string()
            .contains(&format!("locked by process {}", std::process::id())));
    }

    #[test]
    fn test_drop_releases() {
        let dir = tempdir().unwrap();
        drop(DirectoryLock::acquire(dir.path()).unwrap());
        assert!(DirectoryLock::acquire(dir.path()).is_ok());
    }
}
