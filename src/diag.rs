//! Minimal tracing, in the teacher's style of a hand-rolled print macro
//! rather than an external logging crate: none of this family of teaching
//! kernels pulls in `log`/`tracing`, they print straight to their console.
//! Here the "console" is stderr, gated so library consumers who embed this
//! core in something that owns stdio can silence it entirely.

#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {
        #[cfg(feature = "trace")]
        {
            eprintln!("[sectorfs] {}", format_args!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        eprintln!("[sectorfs] warning: {}", format_args!($($arg)*));
    };
}
