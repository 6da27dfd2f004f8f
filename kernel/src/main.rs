//! The kernel image: links the library (whose entry assembly takes over) for
//! the riscv build, and is a no-op elsewhere.
#![cfg_attr(target_arch = "riscv64", no_std)]
#![cfg_attr(target_arch = "riscv64", no_main)]

#[cfg(target_arch = "riscv64")]
use kernel as _;

#[cfg(not(target_arch = "riscv64"))]
fn main() {}
