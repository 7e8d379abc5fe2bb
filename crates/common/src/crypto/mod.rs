//! Cryptographic primitives for the notary
//!
//! - **Keys**: Ed25519 keypairs (`SecretKey`/`PublicKey`) with hex and PEM
//!   encodings. A key's id is the hex SHA-256 of its public bytes.
//! - **Signing**: signatures over the canonical JSON of a role body, and
//!   threshold verification against the key ids a role lists.
//! - **Key storage**: [`KeyStore`] holds the snapshot and timestamp keys the
//!   server signs with for one trust tree.

mod key_store;
mod keys;
mod signing;

pub use ed25519_dalek::Signature;
pub use key_store::KeyStore;
pub use keys::{KeyError, PublicKey, SecretKey, PRIVATE_KEY_SIZE, PUBLIC_KEY_SIZE};
pub use signing::{sign_metadata, verify_role_signatures, SIGNATURE_METHOD};
