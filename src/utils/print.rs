//! Helper macros for logging (console printing).

/// Log TRACE message.
///
/// Example:
/// ```ignore
/// pf_trace!("got {} to print", msg);
/// ```
#[macro_export]
macro_rules! pf_trace {
    ($fmt_str:literal $(, $fmt_arg:expr)*) => {
        log::trace!($fmt_str $(, $fmt_arg)*)
    };
}

/// Log DEBUG message.
///
/// Example:
/// ```ignore
/// pf_debug!("got {} to print", msg);
/// ```
#[macro_export]
macro_rules! pf_debug {
    ($fmt_str:literal $(, $fmt_arg:expr)*) => {
        log::debug!($fmt_str $(, $fmt_arg)*)
    };
}

/// Log INFO message.
#[macro_export]
macro_rules! pf_info {
    ($fmt_str:literal $(, $fmt_arg:expr)*) => {
        log::info!($fmt_str $(, $fmt_arg)*)
    };
}

/// Log WARN message.
#[macro_export]
macro_rules! pf_warn {
    ($fmt_str:literal $(, $fmt_arg:expr)*) => {
        log::warn!($fmt_str $(, $fmt_arg)*)
    };
}

/// Log ERROR message.
#[macro_export]
macro_rules! pf_error {
    ($fmt_str:literal $(, $fmt_arg:expr)*) => {
        log::error!($fmt_str $(, $fmt_arg)*)
    };
}

/// Log an error string to logger and then return a `WinterholdError`
/// containing the string.
///
/// Example:
/// ```ignore
/// return logged_err!("got {} to print", msg);
/// ```
#[macro_export]
macro_rules! logged_err {
    ($fmt_str:literal $(, $fmt_arg:expr)*) => {{
        $crate::pf_error!($fmt_str $(, $fmt_arg)*);
        Err($crate::WinterholdError(format!(
            $fmt_str $(, $fmt_arg)*
        )))
    }};
}

#[cfg(test)]
mod print_tests {
    use crate::utils::WinterholdError;

    #[test]
    fn error_no_args() {
        let e: Result<(), WinterholdError> =
            logged_err!("interesting message");
        assert_eq!(e, Err(WinterholdError("interesting message".into())));
    }

    #[test]
    fn error_with_args() {
        let e: Result<(), WinterholdError> =
            logged_err!("got {} to print", 777);
        assert_eq!(e, Err(WinterholdError("got 777 to print".into())));
    }
}
