//! File-descriptor system calls. Only device-backed files exist in this
//! kernel; open/mknod and friends belong to the on-disk filesystem
//! collaborator and dispatch to the unknown-call diagnostic.

use crate::error::{KernelError, Result};
use crate::file::RcFile;
use crate::kernel::Kernel;
use crate::proc::CurrentProc;

/// The open file behind the nth argument's descriptor.
fn arg_file<'a>(proc: &'a CurrentProc<'_>, n: usize) -> Result<&'a RcFile> {
    let fd = usize::try_from(proc.arg_int(n)).map_err(|_| KernelError::BadFd)?;
    proc.data()
        .open_files
        .get(fd)
        .and_then(|f| f.as_ref())
        .ok_or(KernelError::BadFd)
}

/// Installs `file` in the lowest free descriptor slot.
fn fd_alloc(proc: &mut CurrentProc<'_>, file: RcFile) -> Result<usize> {
    let files = &mut proc.data_mut().open_files;
    match files.iter().position(|f| f.is_none()) {
        Some(fd) => {
            files[fd] = Some(file);
            Ok(fd)
        }
        // Dropping `file` releases the extra reference.
        None => Err(KernelError::OutOfFiles),
    }
}

impl Kernel {
    /// Duplicates a file descriptor.
    pub(super) fn sys_dup(&self, proc: &mut CurrentProc<'_>) -> Result<usize> {
        let file = arg_file(proc, 0)?.dup();
        fd_alloc(proc, file)
    }

    /// Reads up to n bytes into a user buffer.
    pub(super) fn sys_read(&self, proc: &mut CurrentProc<'_>) -> Result<usize> {
        let addr = proc.arg_addr(1);
        let n = proc.arg_int(2);
        if n < 0 {
            return Err(KernelError::Argument);
        }
        // A private reference keeps the file alive without borrowing the
        // descriptor table across the copy.
        let file = arg_file(proc, 0)?.dup();
        file.read(addr, n as usize, proc)
    }

    /// Writes up to n bytes from a user buffer.
    pub(super) fn sys_write(&self, proc: &mut CurrentProc<'_>) -> Result<usize> {
        let addr = proc.arg_addr(1);
        let n = proc.arg_int(2);
        if n < 0 {
            return Err(KernelError::Argument);
        }
        let file = arg_file(proc, 0)?.dup();
        file.write(addr, n as usize, proc)
    }

    /// Closes a file descriptor.
    pub(super) fn sys_close(&self, proc: &mut CurrentProc<'_>) -> Result<usize> {
        let fd = usize::try_from(proc.arg_int(0)).map_err(|_| KernelError::BadFd)?;
        let file = proc
            .data_mut()
            .open_files
            .get_mut(fd)
            .and_then(Option::take)
            .ok_or(KernelError::BadFd)?;
        drop(file);
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console;
    use crate::file::FileKind;
    use crate::kernel::kernel;
    use crate::addr::PGSIZE;
    use crate::test_support::{claim_proc, current_view, kernel_for_tests, retire_proc};

    fn open_console(proc: &mut CurrentProc<'_>) -> usize {
        let file = kernel()
            .ftable()
            .alloc(
                FileKind::Device {
                    major: console::MAJOR,
                },
                true,
                true,
            )
            .unwrap();
        fd_alloc(proc, file).unwrap()
    }

    #[test]
    fn dup_and_close_manage_descriptors() {
        kernel_for_tests();
        let slot = claim_proc();
        let mut proc = current_view(slot);

        let fd = open_console(&mut proc);
        proc.trap_frame_mut().a0 = fd;
        let fd2 = kernel().syscall(10, &mut proc).unwrap();
        assert_ne!(fd, fd2);

        // Closing one leaves the other usable.
        proc.trap_frame_mut().a0 = fd;
        assert_eq!(kernel().syscall(21, &mut proc), Ok(0));
        assert!(proc.data().open_files[fd].is_none());
        assert!(proc.data().open_files[fd2].is_some());

        // Double close is a user error, not a panic.
        proc.trap_frame_mut().a0 = fd;
        assert_eq!(kernel().syscall(21, &mut proc), Err(KernelError::BadFd));

        proc.trap_frame_mut().a0 = fd2;
        assert_eq!(kernel().syscall(21, &mut proc), Ok(0));

        drop(proc);
        retire_proc(slot);
    }

    #[test]
    fn write_drains_the_user_buffer() {
        kernel_for_tests();
        let slot = claim_proc();
        let mut proc = current_view(slot);

        proc.memory_mut().resize(PGSIZE as isize).unwrap();
        proc.memory_mut()
            .copy_out_bytes(crate::addr::UVAddr::from(256), b"hello, hart\n")
            .unwrap();

        let fd = open_console(&mut proc);
        let tf = proc.trap_frame_mut();
        tf.a0 = fd;
        tf.a1 = 256;
        tf.a2 = 12;
        assert_eq!(kernel().syscall(16, &mut proc), Ok(12));

        // A write through an unmapped address is refused.
        let tf = proc.trap_frame_mut();
        tf.a1 = 8 * PGSIZE;
        assert!(kernel().syscall(16, &mut proc).is_err());

        proc.trap_frame_mut().a0 = fd;
        let _ = kernel().syscall(21, &mut proc);

        drop(proc);
        retire_proc(slot);
    }

    #[test]
    fn bad_descriptors_are_rejected() {
        kernel_for_tests();
        let slot = claim_proc();
        let mut proc = current_view(slot);

        for fd in [usize::MAX, 99, 3] {
            proc.trap_frame_mut().a0 = fd;
            assert_eq!(kernel().syscall(10, &mut proc), Err(KernelError::BadFd));
        }

        drop(proc);
        retire_proc(slot);
    }
}
