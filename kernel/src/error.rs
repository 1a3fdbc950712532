//! Kernel-wide error types
//!
//! Every recoverable failure inside the kernel is expressed as a
//! [`KernelError`]. At the syscall boundary errors are flattened into
//! negated POSIX errno values; everywhere else they carry enough context
//! to be logged meaningfully.

use core::fmt;

/// POSIX errno values used at the syscall boundary.
///
/// Only the subset the kernel actually returns is defined here; the wire
/// representation towards userspace is always the negated value.
pub mod errno {
    pub const EPERM: i32 = 1;
    pub const ENOENT: i32 = 2;
    pub const ESRCH: i32 = 3;
    pub const EIO: i32 = 5;
    pub const EAGAIN: i32 = 11;
    pub const ENOMEM: i32 = 12;
    pub const EFAULT: i32 = 14;
    pub const EEXIST: i32 = 17;
    pub const EINVAL: i32 = 22;
    pub const ENOSYS: i32 = 38;
    pub const ENOBUFS: i32 = 105;
}

/// Main kernel error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// Frame bitmap full, heap exhausted, or page-table allocation failed
    OutOfMemory,
    /// Alignment, range, or filter violation; null pointer where forbidden
    InvalidArgument { what: &'static str },
    /// Operation requires a permission the caller does not hold
    NotPermitted { operation: &'static str },
    /// No process with the given pid
    ProcessNotFound { pid: u32 },
    /// Named resource could not be resolved
    NotFound { resource: &'static str },
    /// Resource id collision or double registration
    AlreadyExists { resource: &'static str },
    /// Transport failure on the message / RPC plane
    IoError { operation: &'static str },
    /// Transient failure; the caller may retry
    Again { operation: &'static str },
    /// Userland buffer exchange failed; distinct from kernel memory
    /// exhaustion so userspace can tell the two apart
    NoBuffer,
    /// User pointer was outside the calling address space or the copy
    /// faulted
    BadUserAccess { address: usize },
    /// A blocking operation found nothing to consume. Never surfaces to
    /// userspace as an errno; the syscall layer parks the caller and
    /// replays the trapped instruction instead.
    WouldBlock,
}

/// Convenient result alias used throughout the kernel
pub type KernelResult<T = ()> = Result<T, KernelError>;

impl KernelError {
    /// Flatten into the negated errno delivered to userspace.
    pub fn to_errno(self) -> i32 {
        let positive = match self {
            KernelError::OutOfMemory => errno::ENOMEM,
            KernelError::InvalidArgument { .. } => errno::EINVAL,
            KernelError::NotPermitted { .. } => errno::EPERM,
            KernelError::ProcessNotFound { .. } => errno::ESRCH,
            KernelError::NotFound { .. } => errno::ENOENT,
            KernelError::AlreadyExists { .. } => errno::EEXIST,
            KernelError::IoError { .. } => errno::EIO,
            KernelError::Again { .. } => errno::EAGAIN,
            KernelError::NoBuffer => errno::ENOBUFS,
            KernelError::BadUserAccess { .. } => errno::EFAULT,
            // WouldBlock is consumed by the dispatcher before this point;
            // if it ever leaks, EAGAIN is the least wrong answer.
            KernelError::WouldBlock => errno::EAGAIN,
        };
        -positive
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::OutOfMemory => write!(f, "out of memory"),
            KernelError::InvalidArgument { what } => {
                write!(f, "invalid argument: {}", what)
            }
            KernelError::NotPermitted { operation } => {
                write!(f, "operation not permitted: {}", operation)
            }
            KernelError::ProcessNotFound { pid } => {
                write!(f, "no process with pid {}", pid)
            }
            KernelError::NotFound { resource } => write!(f, "not found: {}", resource),
            KernelError::AlreadyExists { resource } => {
                write!(f, "already exists: {}", resource)
            }
            KernelError::IoError { operation } => write!(f, "i/o error in {}", operation),
            KernelError::Again { operation } => {
                write!(f, "transient failure in {}", operation)
            }
            KernelError::NoBuffer => write!(f, "userland buffer exchange failed"),
            KernelError::BadUserAccess { address } => {
                write!(f, "bad user access at {:#x}", address)
            }
            KernelError::WouldBlock => write!(f, "would block"),
        }
    }
}
