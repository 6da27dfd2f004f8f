//! Machine-dependent backends.
//!
//! Everything above this module is machine-independent; the backend supplies
//! hart identification, the interrupt switches, the context-switch primitive
//! and the trampoline page. On the real machine that is RISC-V assembly; on
//! any other target a hosted stub backend lets the machine-independent core
//! compile and run under `cargo test` (it has no interrupts and cannot
//! context switch).

cfg_if::cfg_if! {
    if #[cfg(target_arch = "riscv64")] {
        pub mod riscv;
        pub use riscv::{cpu_id, intr_get, intr_off, intr_on, swtch, trampoline_pa};
    } else {
        mod hosted;
        pub use hosted::{cpu_id, intr_get, intr_off, intr_on, swtch, trampoline_pa};
    }
}
