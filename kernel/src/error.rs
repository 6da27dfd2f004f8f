use core::fmt;

/// Error values surfaced to callers with a defined failure meaning.
/// Everything else (impossible states, lock misuse) panics instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Physical page allocation failed.
    OutOfMemory,
    /// No free slot in the process table.
    OutOfProcs,
    /// No free slot in the file table.
    OutOfFiles,
    /// No free slot in the inode table.
    OutOfInodes,
    /// A user virtual address was out of range or unmapped.
    BadAddress,
    /// A file descriptor was out of range, closed, or opened the wrong way.
    BadFd,
    /// A syscall argument made no sense.
    Argument,
    /// The requested object does not exist.
    NotFound,
    /// The syscall number has no handler.
    UnknownSyscall,
    /// The operation was abandoned because the process was killed.
    Interrupted,
}

pub type Result<T> = core::result::Result<T, KernelError>;

impl KernelError {
    pub fn as_str(&self) -> &'static str {
        match self {
            KernelError::OutOfMemory => "out of memory",
            KernelError::OutOfProcs => "out of processes",
            KernelError::OutOfFiles => "out of files",
            KernelError::OutOfInodes => "out of inodes",
            KernelError::BadAddress => "bad address",
            KernelError::BadFd => "bad file descriptor",
            KernelError::Argument => "invalid argument",
            KernelError::NotFound => "not found",
            KernelError::UnknownSyscall => "unknown sys call",
            KernelError::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
