//! Transport backend implementations: the deterministic simulator used by
//! the test suite, and the live UDP backend.

mod simulated;
mod udp;

pub use simulated::{FilterFn, SimulatedTransport};
pub use udp::UdpTransport;
