//! Generic client trait to be implemented by all protocol-specific client
//! endpoint structs.

use crate::core::{ClientId, Data, Transport};

use rand::Rng;

/// One-shot callback delivering the result of an invoked operation. Runs on
/// the logical event stream with the transport handed back in, so the
/// callback may immediately invoke again (closed-loop drivers).
pub type InvokeCallback<T> = Box<dyn FnOnce(&mut T, Data)>;

/// Client trait to be implemented by all protocol-specific client structs.
pub trait GenericClient<T: Transport> {
    /// Invokes one operation. The callback fires at most once, when a
    /// matching reply has been accepted.
    fn invoke(
        &mut self,
        transport: &mut T,
        op: Data,
        callback: InvokeCallback<T>,
    );
}

/// Draws a fresh random client identifier. Uniqueness is probabilistic;
/// 32 bits is plenty for the cluster sizes this framework targets.
pub fn random_client_id() -> ClientId {
    rand::thread_rng().gen()
}
