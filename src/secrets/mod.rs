//! Key agreement and sealed channels.
//!
//! ## Security Model
//!
//! - Finite-field Diffie-Hellman; both sides must use identical parameters
//! - The responder uses a fixed provisioned key pair, the initiator a fresh
//!   one per handshake
//! - The initiator only accepts the responder's pre-distributed public value
//! - Channel keys come out of HKDF-SHA256 and are zeroized on drop
//! - Messages are sealed with ChaCha20-Poly1305, so tampering is detected
//!
//! ## Usage
//!
//! ```ignore
//! let trust = Arc::new(TrustStore::load(&config.trust)?);
//!
//! let mut alice = HandshakeActor::initiator("alice", trust.clone());
//! alice.initiate(&mut request)?;
//! // ... deliver request, receive response ...
//! alice.complete(&mut response)?;
//!
//! let channel = alice.into_channel()?;
//! channel.write_with_source("alice", &mut out, "ping")?;
//! ```

pub mod actor;
pub mod channel;
pub mod files;
pub mod provider;
pub mod trust;

pub use actor::{HandshakeActor, HandshakeState, Role};
pub use channel::{read_sealed, CipherText, SecureChannel};
pub use provider::{DhParameters, KeyPair, PrivateValue, PublicValue, SymmetricKey};
pub use trust::{SharedTrustStore, TrustStore};
