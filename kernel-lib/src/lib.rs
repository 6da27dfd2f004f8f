//! Freestanding support code shared by the kestrel kernel crates.
#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod lock;
