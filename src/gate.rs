//! Composite mutual exclusion for the backing files.
//!
//! [`AccessGate`] serializes every operation against the backing storage
//! across two layers: a process-local [`parking_lot::ReentrantMutex`]
//! that orders the threads of this process, and an exclusive OS
//! byte-range lock on a dedicated lock file that orders cooperating
//! processes. The two are always taken in that fixed order (local first,
//! then cross-process) and released in reverse, so no lock-ordering
//! cycle can form between them.
//!
//! Acquisition is reentrant: a thread that already holds the gate only
//! bumps a depth counter on nested [`AccessGate::enter`] calls, and the
//! real locks are released only when the outermost guard unwinds.
//!
//! OS byte-range locks are scoped per process, not per file handle.
//! Every thread of a process must therefore go through the *same*
//! `AccessGate` instance; a second gate opened on the same lock file
//! within one process provides no exclusion against the first.

#![allow(unsafe_code)]

use std::cell::{Cell, RefCell, RefMut};
use std::fs::{File, OpenOptions};
use std::path::Path;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use tracing::error;

use crate::types::Result;

/// Reentrant thread- and process-level mutual exclusion primitive.
///
/// `S` is an arbitrary per-section payload slot: state that should live
/// exactly as long as one outermost critical section (the swap map
/// parks its open store handle there). The slot is dropped when the
/// outermost guard releases the gate.
#[derive(Debug)]
pub struct AccessGate<S> {
    local: ReentrantMutex<GateState<S>>,
    file: File,
}

#[derive(Debug)]
struct GateState<S> {
    depth: Cell<usize>,
    slot: RefCell<Option<S>>,
}

impl<S> AccessGate<S> {
    /// Opens or creates the lock file used for cross-process
    /// coordination. The file carries no data; only its lock state
    /// matters.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())?;
        if file.metadata()?.len() < 1 {
            file.set_len(1)?;
        }
        Ok(Self {
            local: ReentrantMutex::new(GateState {
                depth: Cell::new(0),
                slot: RefCell::new(None),
            }),
            file,
        })
    }

    /// Acquires the gate, blocking indefinitely until it is available.
    ///
    /// The first entry on a call chain takes the process-local mutex and
    /// then the cross-process file lock; nested entries from the same
    /// thread only increment the depth counter.
    pub fn enter(&self) -> Result<GateGuard<'_, S>> {
        let inner = self.local.lock();
        let depth = inner.depth.get();
        if depth == 0 {
            sys::lock_exclusive(&self.file)?;
        }
        inner.depth.set(depth + 1);
        Ok(GateGuard {
            gate: self,
            inner,
            outermost: depth == 0,
        })
    }
}

/// Guard representing one held entry of the gate.
///
/// Dropping the guard decrements the depth counter; the real locks are
/// released, and the section slot discarded, only when the counter
/// reaches zero.
pub struct GateGuard<'a, S> {
    gate: &'a AccessGate<S>,
    inner: ReentrantMutexGuard<'a, GateState<S>>,
    outermost: bool,
}

impl<S> GateGuard<'_, S> {
    /// Whether this guard is the outermost entry of its call chain.
    pub fn is_outermost(&self) -> bool {
        self.outermost
    }

    /// Mutable access to the per-section payload slot.
    pub fn slot(&self) -> RefMut<'_, Option<S>> {
        self.inner.slot.borrow_mut()
    }

    /// Removes and returns the per-section payload, if any.
    pub fn take_slot(&self) -> Option<S> {
        self.inner.slot.borrow_mut().take()
    }
}

impl<S> Drop for GateGuard<'_, S> {
    fn drop(&mut self) {
        let depth = self.inner.depth.get().saturating_sub(1);
        self.inner.depth.set(depth);
        if depth == 0 {
            // Anything left in the slot was not explicitly flushed by
            // the owner; it dies with the section.
            self.inner.slot.borrow_mut().take();
            if let Err(err) = sys::unlock(&self.gate.file) {
                error!("failed to release cross-process lock: {err}");
            }
        }
    }
}

#[cfg(unix)]
mod sys {
    use std::fs::File;
    use std::io;
    use std::os::unix::io::AsRawFd;

    fn fcntl_byte(file: &File, lock_type: i32, blocking: bool) -> io::Result<()> {
        let fd = file.as_raw_fd();
        let mut flock = libc::flock {
            l_type: lock_type as _,
            l_whence: libc::SEEK_SET as _,
            l_start: 0,
            l_len: 1,
            l_pid: 0,
        };
        let cmd = if blocking {
            libc::F_SETLKW
        } else {
            libc::F_SETLK
        };
        loop {
            let res = unsafe { libc::fcntl(fd, cmd, &mut flock) };
            if res == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) if blocking => continue,
                _ => return Err(err),
            }
        }
    }

    pub fn lock_exclusive(file: &File) -> io::Result<()> {
        fcntl_byte(file, libc::F_WRLCK as i32, true)
    }

    pub fn unlock(file: &File) -> io::Result<()> {
        fcntl_byte(file, libc::F_UNLCK as i32, false)
    }
}

#[cfg(windows)]
mod sys {
    use std::fs::File;
    use std::io;
    use std::mem::zeroed;
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Storage::FileSystem::{
        LockFileEx, UnlockFileEx, LOCKFILE_EXCLUSIVE_LOCK,
    };
    use windows_sys::Win32::System::IO::OVERLAPPED;

    pub fn lock_exclusive(file: &File) -> io::Result<()> {
        unsafe {
            let handle = file.as_raw_handle();
            let mut overlapped: OVERLAPPED = zeroed();
            let res = LockFileEx(
                handle as isize,
                LOCKFILE_EXCLUSIVE_LOCK,
                0,
                1,
                0,
                &mut overlapped,
            );
            if res != 0 {
                Ok(())
            } else {
                Err(io::Error::last_os_error())
            }
        }
    }

    pub fn unlock(file: &File) -> io::Result<()> {
        unsafe {
            let handle = file.as_raw_handle();
            let mut overlapped: OVERLAPPED = zeroed();
            let res = UnlockFileEx(handle as isize, 0, 1, 0, &mut overlapped);
            if res != 0 {
                Ok(())
            } else {
                Err(io::Error::last_os_error())
            }
        }
    }
}

#[cfg(not(any(unix, windows)))]
mod sys {
    use std::fs::File;
    use std::io;

    pub fn lock_exclusive(_file: &File) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Other,
            "file locking unsupported on this platform",
        ))
    }

    pub fn unlock(_file: &File) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Other,
            "file locking unsupported on this platform",
        ))
    }
}
