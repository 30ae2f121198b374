//! Secure Memory Management
//!
//! Keeps the wallet's derived encryption key out of swap while the wallet is
//! unlocked. Uses `mlock()` on unix; elsewhere the key is only zeroized on
//! drop. Lock failures are logged and tolerated.

use std::ptr::NonNull;

use zeroize::{Zeroize, Zeroizing};

/// Result of a memory lock operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockResult {
    Locked,
    /// Locking failed; a warning has been logged
    Failed,
    Unsupported,
}

/// Lock a memory region so it is never written to swap.
///
/// # Safety
/// `ptr` must point to valid memory of at least `len` bytes.
unsafe fn mlock(ptr: NonNull<u8>, len: usize) -> LockResult {
    if len == 0 {
        return LockResult::Locked;
    }

    #[cfg(unix)]
    {
        if libc::mlock(ptr.as_ptr() as *const libc::c_void, len) == 0 {
            tracing::debug!("Locked {} bytes of key memory", len);
            return LockResult::Locked;
        }
        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        let reason = match errno {
            libc::ENOMEM => "exceeds RLIMIT_MEMLOCK",
            libc::EPERM => "insufficient permissions (may need CAP_IPC_LOCK)",
            libc::EINVAL => "invalid address range",
            _ => "unknown error",
        };
        tracing::warn!(
            "Failed to lock key memory: {} (errno {}). The wallet key may be swapped to disk.",
            reason,
            errno
        );
        LockResult::Failed
    }

    #[cfg(not(unix))]
    {
        let _ = ptr;
        tracing::warn!("Memory locking not supported on this platform");
        LockResult::Unsupported
    }
}

/// # Safety
/// `ptr` must point to valid memory of at least `len` bytes previously
/// locked with [`mlock`].
unsafe fn munlock(ptr: NonNull<u8>, len: usize) {
    if len == 0 {
        return;
    }

    #[cfg(unix)]
    {
        if libc::munlock(ptr.as_ptr() as *const libc::c_void, len) != 0 {
            tracing::debug!("munlock returned non-zero (likely already unlocked)");
        }
    }

    #[cfg(not(unix))]
    let _ = ptr;
}

/// A 32 byte secret on the heap, mlocked for as long as it lives and zeroed
/// before the lock is released.
pub struct LockedKey {
    bytes: Box<Zeroizing<[u8; 32]>>,
    ptr: NonNull<u8>,
    lock: LockResult,
}

impl LockedKey {
    /// Move `key` into locked memory.
    pub fn new(key: Zeroizing<[u8; 32]>) -> Self {
        let mut bytes = Box::new(Zeroizing::new([0u8; 32]));
        bytes.copy_from_slice(key.as_ref());
        let ptr = NonNull::from(&mut bytes[0]);
        // SAFETY: the boxed array is 32 bytes, never moves, and outlives the
        // lock, which is released in `drop`.
        let lock = unsafe { mlock(ptr, 32) };
        Self { bytes, ptr, lock }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    pub fn is_locked(&self) -> bool {
        self.lock == LockResult::Locked
    }
}

impl Drop for LockedKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
        if self.is_locked() {
            // SAFETY: the box is still alive and this exact range was locked
            // in `new`.
            unsafe { munlock(self.ptr, 32) };
        }
    }
}

// SAFETY: the pointer only ever refers to the box this value owns.
unsafe impl Send for LockedKey {}
unsafe impl Sync for LockedKey {}

impl std::fmt::Debug for LockedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockedKey").field("lock", &self.lock).finish_non_exhaustive()
    }
}
