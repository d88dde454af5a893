//! Pre-distributed trust material.
//!
//! Both ends hold the responder's encoded public value. Only the responder
//! holds the matching private value. The byte-exact comparison in
//! [`TrustStore::is_trusted`] is the only thing standing between an
//! initiator and a man-in-the-middle, so it runs before any peer value is
//! accepted.

use crate::config::TrustConfig;
use crate::error::{SealError, SealResult};
use crate::secrets::files;
use crate::secrets::provider::{encode_public_value, KeyPair, PrivateValue, PublicValue};
use std::sync::Arc;
use tracing::info;

/// Trust store shared by every actor of a process.
pub type SharedTrustStore = Arc<TrustStore>;

pub struct TrustStore {
    public: PublicValue,
    encoded_public: Vec<u8>,
    private: Option<PrivateValue>,
}

impl TrustStore {
    /// Initiator side: only the responder's public value is known.
    pub fn initiator(public: PublicValue) -> SealResult<Self> {
        let encoded_public = encode_public_value(&public)?;
        Ok(Self {
            public,
            encoded_public,
            private: None,
        })
    }

    /// Responder side: the full provisioned key pair.
    pub fn responder(pair: KeyPair) -> SealResult<Self> {
        let encoded_public = encode_public_value(&pair.public)?;
        Ok(Self {
            public: pair.public,
            encoded_public,
            private: Some(pair.private),
        })
    }

    /// Load trust material from the files named in configuration.
    ///
    /// When `dh_params` is set the trusted value must be defined over exactly
    /// those parameters.
    pub fn load(config: &TrustConfig) -> SealResult<Self> {
        let public = files::read_public_value(&config.public_value)?;

        if let Some(path) = &config.dh_params {
            let params = files::read_dh_parameters(path)?;
            if &params != public.params() {
                return Err(SealError::security(
                    "trusted public value does not match the configured DH parameters",
                ));
            }
        }

        let store = match &config.private_value {
            Some(path) => {
                let private = files::read_private_value(path)?;
                Self::responder(KeyPair::from_parts(public, private)?)?
            }
            None => Self::initiator(public)?,
        };

        info!(
            "Loaded trust material from {} ({} side, {}-bit group)",
            config.public_value.display(),
            if store.is_responder() { "responder" } else { "initiator" },
            store.public.params().bits()
        );
        Ok(store)
    }

    pub fn trusted_public_value(&self) -> &PublicValue {
        &self.public
    }

    /// Encoded form of the trusted public value, as exchanged on the wire.
    pub fn encoded_public_value(&self) -> &[u8] {
        &self.encoded_public
    }

    /// The responder's private value. Fails on an initiator-side store.
    pub fn trusted_private_value(&self) -> SealResult<&PrivateValue> {
        self.private
            .as_ref()
            .ok_or_else(|| SealError::security("no trusted private value on this side"))
    }

    /// The provisioned key pair. Fails on an initiator-side store.
    pub fn key_pair(&self) -> SealResult<KeyPair> {
        Ok(KeyPair {
            public: self.public.clone(),
            private: self.trusted_private_value()?.clone(),
        })
    }

    pub fn is_responder(&self) -> bool {
        self.private.is_some()
    }

    /// Whether `candidate` is byte-for-byte the trusted encoded public value.
    pub fn is_trusted(&self, candidate: &[u8]) -> bool {
        self.encoded_public.as_slice() == candidate
    }
}

impl std::fmt::Debug for TrustStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustStore")
            .field("public", &crate::bus::fingerprint(&self.encoded_public))
            .field("responder", &self.is_responder())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::secrets::provider::generate_key_pair;
    use crate::secrets::provider::tests::test_params;
    use num_bigint::BigUint;

    fn fixed_pair() -> KeyPair {
        KeyPair::from_private(&test_params(), BigUint::from(6u32)).unwrap()
    }

    #[test]
    fn test_initiator_store_has_no_private_value() {
        let store = TrustStore::initiator(fixed_pair().public).unwrap();
        assert!(!store.is_responder());
        let err = store.trusted_private_value().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Security);
        assert!(store.key_pair().is_err());
    }

    #[test]
    fn test_is_trusted_is_byte_exact() {
        let pair = fixed_pair();
        let store = TrustStore::responder(pair.clone()).unwrap();

        let encoded = encode_public_value(&pair.public).unwrap();
        assert!(store.is_trusted(&encoded));

        let mut flipped = encoded.clone();
        let last = flipped.len() - 1;
        flipped[last] ^= 0x01;
        assert!(!store.is_trusted(&flipped));
        assert!(!store.is_trusted(&encoded[..last]));
        assert!(!store.is_trusted(&[]));

        let other = generate_key_pair(&test_params()).unwrap();
        if other.public != pair.public {
            assert!(!store.is_trusted(&encode_public_value(&other.public).unwrap()));
        }
    }

    #[test]
    fn test_responder_key_pair() {
        let pair = fixed_pair();
        let store = TrustStore::responder(pair.clone()).unwrap();
        let back = store.key_pair().unwrap();
        assert_eq!(back.public, pair.public);
        assert_eq!(back.private, pair.private);
    }

    #[test]
    fn test_load_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("bob");
        let pair = files::write_key_pair(&fixed_pair(), &prefix).unwrap();
        let (pv, x) = files::key_pair_paths(&prefix);
        let dh = dir.path().join("group.dh");
        files::write_dh_parameters(&test_params(), &dh).unwrap();

        let initiator = TrustStore::load(&TrustConfig {
            public_value: pv.clone(),
            private_value: None,
            dh_params: Some(dh),
            preshared: Default::default(),
        })
        .unwrap();
        assert!(!initiator.is_responder());
        assert_eq!(initiator.trusted_public_value(), &pair.public);

        let responder = TrustStore::load(&TrustConfig {
            public_value: pv,
            private_value: Some(x),
            dh_params: None,
            preshared: Default::default(),
        })
        .unwrap();
        assert!(responder.is_responder());
        assert_eq!(
            responder.encoded_public_value(),
            initiator.encoded_public_value()
        );
    }

    #[test]
    fn test_load_rejects_foreign_material() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("bob");
        files::write_key_pair(&fixed_pair(), &prefix).unwrap();
        let (pv, _) = files::key_pair_paths(&prefix);

        let stranger = dir.path().join("stranger");
        files::write_key_pair(&generate_key_pair(&test_params()).unwrap(), &stranger).unwrap();
        let (_, stranger_x) = files::key_pair_paths(&stranger);

        let mismatched = TrustStore::load(&TrustConfig {
            public_value: pv,
            private_value: Some(stranger_x),
            dh_params: None,
            preshared: Default::default(),
        });
        assert!(mismatched.unwrap_err().is_security());

        let missing = TrustStore::load(&TrustConfig {
            public_value: dir.path().join("absent.pv"),
            private_value: None,
            dh_params: None,
            preshared: Default::default(),
        });
        assert_eq!(missing.unwrap_err().kind(), ErrorKind::Transport);
    }
}
