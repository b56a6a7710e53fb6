//! Foundational ID types and opaque value types shared by every protocol.

use smallvec::SmallVec;

/// Log slot number type. Monotone, starts at 1 per log; 0 denotes "unset".
pub type OpNumber = u64;

/// Per-client request sequence number type. Monotone, starts at 1.
pub type RequestNumber = u32;

/// View number type. Monotone across view changes, starts at 0.
pub type ViewNumber = u32;

/// Server replica ID type.
pub type ReplicaId = i8;

/// Client ID type; a random identifier chosen once per client lifetime.
pub type ClientId = u32;

/// Opaque variable-length byte payload, used for operations, results, and
/// serialized sub-messages. Payloads of at most 16 bytes stay inline.
pub type Data = SmallVec<[u8; 16]>;

/// 32-byte digest type, reserved for the chain log variant.
pub type Digest = [u8; 32];

/// Maximum number of entries a single consensus block may batch.
pub const BLOCK_SIZE: usize = 50;

/// Builds a `Data` payload from anything byte-like.
pub fn data_of(bytes: impl AsRef<[u8]>) -> Data {
    SmallVec::from_slice(bytes.as_ref())
}

#[cfg(test)]
mod types_tests {
    use super::*;

    #[test]
    fn small_payload_inline() {
        let d = data_of(b"tiny");
        assert!(!d.spilled());
        let d = data_of([7u8; 64]);
        assert!(d.spilled());
    }

    #[test]
    fn data_equality() {
        assert_eq!(data_of(b"same"), data_of(b"same"));
        assert_ne!(data_of(b"same"), data_of(b"diff"));
    }
}
