//! Logging macros, backed by either `defmt` or `log`, or compiled away entirely.

#[cfg(all(feature = "defmt", feature = "log"))]
compile_error!("features `defmt` and `log` are mutually exclusive");

#[cfg(feature = "defmt")]
mod backend {
    #[macro_export]
    macro_rules! trace {
        ($($x:tt)*) => { ::defmt::trace!($($x)*) };
    }
    #[macro_export]
    macro_rules! debug {
        ($($x:tt)*) => { ::defmt::debug!($($x)*) };
    }
    #[macro_export]
    macro_rules! warn {
        ($($x:tt)*) => { ::defmt::warn!($($x)*) };
    }
    #[macro_export]
    macro_rules! error {
        ($($x:tt)*) => { ::defmt::error!($($x)*) };
    }
}

#[cfg(all(feature = "log", not(feature = "defmt")))]
mod backend {
    #[macro_export]
    macro_rules! trace {
        ($($x:tt)*) => { ::log::trace!($($x)*) };
    }
    #[macro_export]
    macro_rules! debug {
        ($($x:tt)*) => { ::log::debug!($($x)*) };
    }
    #[macro_export]
    macro_rules! warn {
        ($($x:tt)*) => { ::log::warn!($($x)*) };
    }
    #[macro_export]
    macro_rules! error {
        ($($x:tt)*) => { ::log::error!($($x)*) };
    }
}

#[cfg(not(any(feature = "defmt", feature = "log")))]
mod backend {
    #[macro_export]
    macro_rules! trace {
        ($($x:tt)*) => {{ let _ = ($($x)*,); }};
    }
    #[macro_export]
    macro_rules! debug {
        ($($x:tt)*) => {{ let _ = ($($x)*,); }};
    }
    #[macro_export]
    macro_rules! warn {
        ($($x:tt)*) => {{ let _ = ($($x)*,); }};
    }
    #[macro_export]
    macro_rules! error {
        ($($x:tt)*) => {{ let _ = ($($x)*,); }};
    }
}
