// model = "claude-opus-4-5"
// created = "2026-01-30"
// modified = "2026-10-18"
// driver = "Isaac Clayton"

//! Site identities.
//!
//! Every replica that authors operations is identified by an ed25519 public
//! key. The key is only used as a stable, collision-free origin for operation
//! ids; the secret half never leaves the keypair.

use ed25519_dalek::SigningKey;
use rand_core::OsRng;
use serde::Deserialize;
use serde::Serialize;

/// A public key, 32 bytes on the ed25519 curve.
///
/// Ordered bytewise so that ids from one origin sort next to each other.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyPub(pub [u8; 32]);

/// A secret key, 32 bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct KeySec(pub [u8; 32]);

/// A keypair bundles a public and secret key together.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub key_pub: KeyPub,
    pub key_sec: KeySec,
}

impl KeyPair {
    /// Generate a random keypair.
    pub fn generate() -> KeyPair {
        let signing = SigningKey::generate(&mut OsRng);
        return KeyPair::from_signing(signing);
    }

    /// Derive a keypair from a fixed 32-byte seed.
    ///
    /// Deterministic: the same seed always yields the same public key, which
    /// keeps replayed traces and property tests reproducible.
    pub fn from_seed(seed: [u8; 32]) -> KeyPair {
        return KeyPair::from_signing(SigningKey::from_bytes(&seed));
    }

    fn from_signing(signing: SigningKey) -> KeyPair {
        let verifying = signing.verifying_key();
        return KeyPair {
            key_pub: KeyPub(verifying.to_bytes()),
            key_sec: KeySec(signing.to_bytes()),
        };
    }
}

impl KeyPub {
    /// A short hex prefix, enough to tell sites apart in logs.
    pub fn short(&self) -> String {
        return hex(&self.0[..4]);
    }
}

fn hex(bytes: &[u8]) -> String {
    return bytes.iter().map(|b| format!("{:02x}", b)).collect();
}

impl std::fmt::Debug for KeyPub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        return write!(f, "KeyPub({})", self.short());
    }
}

impl std::fmt::Display for KeyPub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        return f.write_str(&self.short());
    }
}

impl std::fmt::Debug for KeySec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        return f.write_str("KeySec(..)");
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        return write!(f, "KeyPair {{ pub: {} }}", hex(&self.key_pub.0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_differ() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        assert_ne!(a.key_pub, b.key_pub);
    }

    #[test]
    fn seeded_keys_are_stable() {
        let a = KeyPair::from_seed([7; 32]);
        let b = KeyPair::from_seed([7; 32]);
        let c = KeyPair::from_seed([8; 32]);
        assert_eq!(a.key_pub, b.key_pub);
        assert_ne!(a.key_pub, c.key_pub);
    }

    #[test]
    fn debug_hides_secret() {
        let pair = KeyPair::from_seed([1; 32]);
        let secret = format!("{:?}", pair.key_sec);
        assert_eq!(secret, "KeySec(..)");
        assert_eq!(format!("{:?}", pair.key_pub).len(), "KeyPub()".len() + 8);
    }
}
