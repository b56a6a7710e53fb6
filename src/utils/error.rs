//! Customized unified error type.

use std::fmt;
use std::io;
use std::net;

/// Customized error type for Winterhold.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct WinterholdError(pub String);

impl WinterholdError {
    /// Constructs an error from anything castable to string.
    pub fn msg(m: impl ToString) -> Self {
        WinterholdError(m.to_string())
    }
}

impl fmt::Display for WinterholdError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0) // do not display literal quotes
    }
}

impl std::error::Error for WinterholdError {}

// Helper macro for saving boiler-plate `impl From<T>`s for transparent
// conversion from various common error types to `WinterholdError`.
macro_rules! impl_from_error {
    ($error:ty) => {
        impl From<$error> for WinterholdError {
            fn from(e: $error) -> Self {
                // just store the source error's string representation
                WinterholdError(e.to_string())
            }
        }
    };
}

impl_from_error!(io::Error);
impl_from_error!(net::AddrParseError);
impl_from_error!(rmp_serde::encode::Error);
impl_from_error!(rmp_serde::decode::Error);
impl_from_error!(toml::ser::Error);
impl_from_error!(toml::de::Error);
impl_from_error!(crossbeam_channel::RecvError);
impl_from_error!(crossbeam_channel::RecvTimeoutError);

impl<T> From<crossbeam_channel::SendError<T>> for WinterholdError {
    fn from(e: crossbeam_channel::SendError<T>) -> Self {
        WinterholdError(e.to_string())
    }
}

#[cfg(test)]
mod error_tests {
    use super::*;

    #[test]
    fn error_display() {
        let e = WinterholdError("what the heck?".into());
        assert_eq!(format!("{}", e), String::from("what the heck?"));
    }

    #[test]
    fn from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "oh no!");
        let e = WinterholdError::from(io_error);
        assert!(e.0.contains("oh no!"));
    }
}
