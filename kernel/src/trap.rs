//! Trap handling: system calls, device interrupts and timer ticks, and the
//! path back to user space.

use crate::arch::riscv::asm::{
    intr_get, intr_off, intr_on, r_satp, r_scause, r_sepc, r_sip, r_stval, r_tp, w_sepc, w_sip,
    w_stvec, Sstatus,
};
use crate::arch::riscv::{enter_user, kernelvec, trampoline_va, uservec};
use crate::addr::PGSIZE;
use crate::kernel::kernel;
use crate::memlayout::UART0_IRQ;
use crate::plic;
use crate::println;
use crate::proc::{current, CurrentProc, ProcState};
use crate::sleepablelock::SleepableGuard;
use crate::uart;

/// Installs the kernel trap vector on this hart.
///
/// # Safety
///
/// Boot-time only, once per hart.
pub unsafe fn init_hart() {
    unsafe { w_stvec(kernelvec as usize) };
}

/// Handles an interrupt, exception or system call from user space. Called
/// from the trampoline.
#[no_mangle]
pub unsafe extern "C" fn usertrap() -> ! {
    assert!(
        !Sstatus::read().contains(Sstatus::SPP),
        "usertrap: not from user mode"
    );

    // We're in the kernel now: send further traps to kerneltrap.
    unsafe { w_stvec(kernelvec as usize) };

    // SAFETY: this is the start of this kernel thread; no other CurrentProc
    // exists.
    let mut proc = unsafe { current().expect("usertrap: no process") };

    // Save the user program counter.
    proc.trap_frame_mut().epc = r_sepc();

    let scause = r_scause();
    let mut which_dev = 0;
    if scause == 8 {
        // System call.
        if proc.killed() {
            kernel().procs().exit_current(-1, &mut proc);
        }

        // sepc points to the ecall instruction, but we want to return to the
        // next instruction.
        proc.trap_frame_mut().epc += 4;

        // An interrupt will change sepc, scause and sstatus, so enable only
        // now that we're done with those registers.
        unsafe { intr_on() };

        let num = proc.trap_frame().a7 as i32;
        let ret = kernel().syscall(num, &mut proc);
        proc.trap_frame_mut().a0 = ret.unwrap_or(usize::MAX);
    } else {
        which_dev = dev_intr();
        if which_dev == 0 {
            println!(
                "usertrap(): unexpected scause {:#x} pid={}",
                scause,
                proc.pid()
            );
            println!("            sepc={:#x} stval={:#x}", r_sepc(), r_stval());
            proc.kill();
        }
    }

    // A kill may have arrived while we were in the kernel; this is the
    // boundary where it is observed.
    if proc.killed() {
        kernel().procs().exit_current(-1, &mut proc);
    }

    // Give up the hart if this was a timer interrupt.
    if which_dev == 2 {
        proc.yield_cpu();
    }

    unsafe { usertrapret(proc) }
}

/// Returns to user space through the trampoline.
///
/// # Safety
///
/// `proc` must be this hart's running process, with a valid trapframe.
pub unsafe fn usertrapret(mut proc: CurrentProc<'static>) -> ! {
    // We're about to switch the destination of traps from kerneltrap to
    // usertrap; turn interrupts off until we're back in user space where
    // usertrap is the right destination.
    intr_off();

    unsafe { w_stvec(trampoline_va(uservec)) };

    // Set up the trapframe values that uservec will need when the process
    // next traps into the kernel.
    let kstack = proc.data().kstack;
    let tf = proc.trap_frame_mut();
    tf.kernel_satp = r_satp();
    tf.kernel_sp = kstack + PGSIZE;
    tf.kernel_trap = usertrap as usize;
    tf.kernel_hartid = r_tp();

    // Set up the registers the trampoline's sret will use to get to user
    // space: previous privilege = user, interrupts on in user mode, and the
    // saved user pc.
    let epc = tf.epc;
    unsafe {
        Sstatus::read()
            .difference(Sstatus::SPP)
            .union(Sstatus::SPIE)
            .write();
        w_sepc(epc);
    }

    let satp = proc.memory().satp();

    // SAFETY: the trapframe is prepared and satp is this process's page
    // table.
    unsafe { enter_user(satp) }
}

/// Interrupts and exceptions from kernel code come here via kernelvec, on
/// whatever the current kernel stack is.
#[no_mangle]
pub unsafe extern "C" fn kerneltrap() {
    let sepc = r_sepc();
    let sstatus = Sstatus::read();

    assert!(
        sstatus.contains(Sstatus::SPP),
        "kerneltrap: not from supervisor mode"
    );
    assert!(!intr_get(), "kerneltrap: interrupts enabled");

    let which_dev = dev_intr();
    if which_dev == 0 {
        println!(
            "scause {:#x} sepc={:#x} stval={:#x}",
            r_scause(),
            r_sepc(),
            r_stval()
        );
        panic!("kerneltrap");
    }

    // Give up the hart if this was a timer interrupt and a process is
    // running.
    if which_dev == 2 {
        let cpu = kernel().cpus().current_raw();
        // SAFETY: interrupts are off in a trap handler; cpu is ours.
        let proc = unsafe { (*cpu).proc };
        if !proc.is_null() {
            // SAFETY: cpu.proc points into the static process table.
            let proc = unsafe { &*proc };
            let mut guard = proc.lock();
            if matches!(guard.state(), ProcState::Running) {
                guard.deref_mut_info().state = ProcState::Runnable;
                // SAFETY: we hold the slot's lock and just left Running.
                unsafe { guard.sched() };
            }
        }
    }

    // The yield may have caused some traps to occur; restore the trap
    // registers for use by kernelvec's sepc instruction.
    unsafe {
        w_sepc(sepc);
        sstatus.write();
    }
}

/// The timer tick: bump `ticks` and wake anyone sleeping on it.
fn clock_intr() {
    let mut ticks = kernel().ticks().lock();
    *ticks = ticks.wrapping_add(1);
    ticks.wakeup();
}

/// Decides what kind of interrupt arrived and dispatches it.
/// Returns 2 for a timer tick, 1 for another device, 0 if unrecognized.
fn dev_intr() -> i32 {
    let scause = r_scause();

    if scause & (1 << 63) != 0 && scause & 0xff == 9 {
        // A supervisor external interrupt, via the PLIC.
        let irq = plic::claim();

        if irq as usize == UART0_IRQ {
            uart::intr();
        } else if irq != 0 {
            println!("unexpected interrupt irq={}", irq);
        }

        // The PLIC won't deliver this interrupt again until told it's done.
        if irq != 0 {
            plic::complete(irq);
        }
        1
    } else if scause == (1 << 63) | 1 {
        // A software interrupt from the machine-mode timer handler.
        if crate::arch::cpu_id() == 0 {
            clock_intr();
        }

        // Acknowledge.
        unsafe { w_sip(r_sip() & !2) };
        2
    } else {
        0
    }
}
