//! The RISC-V backend: CSR access, boot path, trap vectors and the
//! context-switch and trampoline assembly.

pub mod asm;
mod entry;
mod kernelvec;
pub mod start;
mod swtch;
mod trampoline;

pub use asm::{cpu_id, intr_get, intr_off, intr_on};
pub use kernelvec::kernelvec;
pub use swtch::swtch;
pub use trampoline::{enter_user, trampoline_pa, trampoline_va, uservec};
