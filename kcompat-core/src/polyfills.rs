//! Behavioral implementations of the installed polyfills.
//!
//! Each routine reproduces the externally observable contract of the
//! native host API it stands in for, over a small in-memory model of the
//! kernel objects involved. The emitted header carries the C rendition of
//! the same routines; these are the testable twins.

use std::sync::{Condvar, Mutex, PoisonError};

/// Set-group-id bit.
pub const S_ISGID: u32 = 0o2000;
/// Directory file type bit.
pub const S_IFDIR: u32 = 0o040000;
/// File type mask.
pub const S_IFMT: u32 = 0o170000;

/// A mode word carrying file type and permission bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMode(pub u32);

impl FileMode {
    pub fn directory(perm: u32) -> Self {
        FileMode(S_IFDIR | perm)
    }

    pub fn regular(perm: u32) -> Self {
        FileMode(perm & !S_IFMT)
    }

    pub fn is_dir(self) -> bool {
        self.0 & S_IFMT == S_IFDIR
    }

    pub fn is_setgid(self) -> bool {
        self.0 & S_ISGID != 0
    }

    pub fn with_setgid(self) -> Self {
        FileMode(self.0 | S_ISGID)
    }
}

/// The caller's effective identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
}

/// The slice of inode state the shimmed operations touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InodeAttrs {
    pub uid: u32,
    pub gid: u32,
    pub mode: FileMode,
    pub nlink: u32,
}

/// Initialize ownership of a new inode the way the native helper does.
///
/// The owner uid comes from the caller's effective uid. When the parent
/// directory carries the set-group-id bit, the child inherits the
/// parent's gid, and a directory child additionally keeps the bit so the
/// propagation continues downward. Otherwise the gid defaults to the
/// caller's effective gid.
pub fn init_owner(caller: Credentials, dir: Option<&InodeAttrs>, mode: FileMode) -> InodeAttrs {
    let mut mode = mode;
    let gid = match dir {
        Some(dir) if dir.mode.is_setgid() => {
            if mode.is_dir() {
                mode = mode.with_setgid();
            }
            dir.gid
        }
        _ => caller.gid,
    };
    InodeAttrs {
        uid: caller.uid,
        gid,
        mode,
        nlink: 1,
    }
}

/// Set an inode's link count directly, as the accessor does natively.
pub fn set_nlink(inode: &mut InodeAttrs, nlink: u32) {
    inode.nlink = nlink;
}

/// Drop an inode's link count to zero.
pub fn clear_nlink(inode: &mut InodeAttrs) {
    inode.nlink = 0;
}

/// Errors a write-fault path can hand back for translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultError {
    /// Bad address or permission failure during the fault.
    BadAddress,
    /// Allocation failed under the fault.
    OutOfMemory,
    /// The caller should retry the fault.
    WouldBlock,
    /// Device-level I/O failure.
    Io,
    /// No space left for the block reservation.
    NoSpace,
}

/// Fault status codes a page-fault handler must return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultStatus {
    /// Success; the page is locked and ready.
    Locked,
    /// No page could be set up.
    NoPage,
    /// Out of memory.
    Oom,
    /// Retry the fault.
    Retry,
    /// Unrecoverable; deliver a bus fault.
    SigBus,
}

/// Translate a write-fault outcome into a fault status, matching the
/// native translation helper exactly.
pub fn page_mkwrite_status(outcome: Result<(), FaultError>) -> FaultStatus {
    match outcome {
        Ok(()) => FaultStatus::Locked,
        Err(FaultError::BadAddress) => FaultStatus::NoPage,
        Err(FaultError::OutOfMemory) => FaultStatus::Oom,
        Err(FaultError::WouldBlock) => FaultStatus::Retry,
        Err(_) => FaultStatus::SigBus,
    }
}

/// Write-admission levels tracked by superblock freeze protection,
/// outermost first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreezeLevel {
    Write,
    PageFault,
    Internal,
}

impl FreezeLevel {
    fn index(self) -> usize {
        match self {
            FreezeLevel::Write => 0,
            FreezeLevel::PageFault => 1,
            FreezeLevel::Internal => 2,
        }
    }
}

#[derive(Debug, Default)]
struct FreezeState {
    frozen: bool,
    holders: [u32; 3],
}

/// The freeze gate of one superblock.
///
/// Writers at any level are admitted only while the superblock is thawed;
/// a freeze completes once every admitted holder has released.
#[derive(Debug, Default)]
pub struct SbFreeze {
    state: Mutex<FreezeState>,
    changed: Condvar,
}

impl SbFreeze {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the superblock frozen and wait for admitted holders to drain.
    pub fn freeze(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.frozen = true;
        while state.holders.iter().any(|h| *h > 0) {
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Thaw the superblock and wake every waiter.
    pub fn thaw(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.frozen = false;
        self.changed.notify_all();
    }

    pub fn is_frozen(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .frozen
    }

    /// Block until admitted at the given level.
    pub fn acquire(&self, level: FreezeLevel) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        while state.frozen {
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.holders[level.index()] += 1;
    }

    /// Release an admission taken with [`SbFreeze::acquire`].
    pub fn release(&self, level: FreezeLevel) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.holders[level.index()] = state.holders[level.index()].saturating_sub(1);
        self.changed.notify_all();
    }

    /// The pre-counter frozen-state wait: block while frozen, admit
    /// nothing. This is the check the degraded internal-write hook must
    /// keep performing.
    pub fn wait_unfrozen(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        while state.frozen {
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn holders(&self, level: FreezeLevel) -> u32 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .holders[level.index()]
    }
}
