/// Maximum number of processes.
pub const NPROC: usize = 64;

/// Maximum number of CPUs.
pub const NCPU: usize = 8;

/// Open files per process.
pub const NOFILE: usize = 16;

/// Open files per system.
pub const NFILE: usize = 100;

/// Maximum number of active i-nodes.
pub const NINODE: usize = 50;

/// Device number of the root filesystem.
pub const ROOTDEV: u32 = 1;

/// Max concurrently outstanding filesystem operations.
pub const MAXOPBLOCKS: usize = 10;

/// Maximum length of process name.
pub const MAXPROCNAME: usize = 16;

/// Size of the console input buffer.
pub const INPUT_BUF: usize = 128;
