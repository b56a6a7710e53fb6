//! Helper utilities, functions, and macros.

#[macro_use]
mod print;

#[macro_use]
mod config;

mod error;
mod wire;

pub use error::WinterholdError;
pub use wire::{wire_decode, wire_encode};
