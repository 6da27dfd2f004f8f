//! Formatted console output and the panic handler.

/// print! prints to the console.
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::printf::_print(format_args!($($arg)*)));
}

/// println! prints to the console, with a newline.
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "riscv64")] {
        use core::fmt;
        use core::sync::atomic::{AtomicBool, Ordering};

        use crate::spinlock::{new_spinlock, Spinlock};
        use crate::uart;

        /// Set on panic; freezes console output from every other hart.
        pub static PANICKED: AtomicBool = AtomicBool::new(false);

        struct Writer;

        impl fmt::Write for Writer {
            fn write_str(&mut self, s: &str) -> fmt::Result {
                for b in s.bytes() {
                    uart::putc_sync(b);
                }
                Ok(())
            }
        }

        /// Serializes whole lines so concurrent harts don't interleave.
        static PRINT_LOCK: Spinlock<()> = new_spinlock("pr", ());

        /// Cleared by the panic handler so the report gets out even if the
        /// print lock is wedged.
        static LOCKING: AtomicBool = AtomicBool::new(true);

        #[doc(hidden)]
        pub fn _print(args: fmt::Arguments<'_>) {
            use fmt::Write;
            if LOCKING.load(Ordering::Acquire) {
                let _guard = PRINT_LOCK.lock();
                Writer.write_fmt(args).unwrap();
            } else {
                let _ = Writer.write_fmt(args);
            }
        }

        /// Freezes the other harts' output, reports, and parks this hart.
        #[cfg(not(test))]
        #[panic_handler]
        fn panic_handler(info: &core::panic::PanicInfo<'_>) -> ! {
            LOCKING.store(false, Ordering::Release);
            crate::println!("panic: {}", info);
            PANICKED.store(true, Ordering::Release);
            loop {
                core::hint::spin_loop();
            }
        }
    } else if #[cfg(test)] {
        use core::fmt;

        #[doc(hidden)]
        pub fn _print(args: fmt::Arguments<'_>) {
            std::print!("{}", args);
        }
    } else {
        use core::fmt;

        /// The hosted backend without a test harness has nowhere to print.
        #[doc(hidden)]
        pub fn _print(args: fmt::Arguments<'_>) {
            let _ = args;
        }
    }
}
