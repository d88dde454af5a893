//! Symmetric encrypted channel bound to one peer.

use crate::bus::{self, Payload, Sourced};
use crate::error::{SealError, SealResult};
use crate::secrets::provider::SymmetricKey;
use bincode::Options;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::io::{Read, Write};
use zeroize::Zeroizing;

/// ChaCha20-Poly1305 nonce length
pub const NONCE_LEN: usize = 12;

/// Ciphered bytes as produced by a [`SecureChannel`].
///
/// Carries no algorithm metadata; both ends already agree on the channel key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherText {
    pub nonce: [u8; NONCE_LEN],
    pub bytes: Vec<u8>,
}

/// Encrypted communication channel.
///
/// A channel created by a handshake actor stays keyless until the handshake
/// completes.
pub struct SecureChannel {
    id: String,
    key: Option<SymmetricKey>,
}

impl SecureChannel {
    pub fn new<S: Into<String>>(id: S, key: SymmetricKey) -> Self {
        Self {
            id: id.into(),
            key: Some(key),
        }
    }

    pub(crate) fn unkeyed<S: Into<String>>(id: S) -> Self {
        Self {
            id: id.into(),
            key: None,
        }
    }

    /// Identifier of the peer this channel talks to.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_keyed(&self) -> bool {
        self.key.is_some()
    }

    /// The symmetric key used on this channel.
    pub fn key(&self) -> SealResult<&SymmetricKey> {
        self.key
            .as_ref()
            .ok_or_else(|| SealError::security(format!("channel {} has no key", self.id)))
    }

    pub(crate) fn install_key(&mut self, key: SymmetricKey) {
        self.key = Some(key);
    }

    fn cipher(&self) -> SealResult<ChaCha20Poly1305> {
        ChaCha20Poly1305::new_from_slice(self.key()?.as_bytes())
            .map_err(|_| SealError::security("invalid channel key"))
    }

    /// Encrypt raw bytes under the channel key.
    pub fn encrypt(&self, plaintext: &[u8]) -> SealResult<CipherText> {
        let cipher = self.cipher()?;

        let mut nonce = [0u8; NONCE_LEN];
        OsRng
            .try_fill_bytes(&mut nonce)
            .map_err(|e| SealError::security(format!("random source unavailable: {}", e)))?;

        let bytes = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| SealError::security("encryption failed"))?;

        Ok(CipherText { nonce, bytes })
    }

    /// Decrypt bytes sealed under the channel key.
    pub fn decrypt(&self, sealed: &CipherText) -> SealResult<Vec<u8>> {
        self.cipher()?
            .decrypt(Nonce::from_slice(&sealed.nonce), sealed.bytes.as_slice())
            .map_err(|_| {
                SealError::security("decryption failed - invalid ciphertext or wrong key")
            })
    }

    /// Serialize then encrypt a value.
    pub fn seal<T: Serialize + ?Sized>(&self, data: &T) -> SealResult<CipherText> {
        let plain = Zeroizing::new(
            bus::codec()
                .serialize(data)
                .map_err(SealError::from_envelope_codec)?,
        );
        self.encrypt(&plain)
    }

    /// Decrypt then deserialize a value.
    pub fn open<T: DeserializeOwned>(&self, sealed: &CipherText) -> SealResult<T> {
        let plain = Zeroizing::new(self.decrypt(sealed)?);
        bus::codec()
            .deserialize(&plain)
            .map_err(SealError::from_envelope_codec)
    }

    /// Write a sealed value to a stream.
    pub fn write<W: Write, T: Serialize + ?Sized>(&self, out: &mut W, data: &T) -> SealResult<()> {
        bus::write(out, &Payload::Sealed(self.seal(data)?))
    }

    /// Read a sealed value from a stream.
    pub fn read<R: Read, T: DeserializeOwned>(&self, input: &mut R) -> SealResult<T> {
        let sealed = bus::read::<_, Payload>(input)?.into_sealed()?;
        self.open(&sealed)
    }

    /// Write a sealed value along with the identifier of its source.
    pub fn write_with_source<W: Write, T: Serialize + ?Sized>(
        &self,
        source_id: &str,
        out: &mut W,
        data: &T,
    ) -> SealResult<()> {
        bus::write_with_source(source_id, out, &Payload::Sealed(self.seal(data)?))
    }

    /// Read a sourced value and decrypt its payload with this channel's key.
    pub fn read_with_source<R: Read, T: DeserializeOwned>(
        &self,
        input: &mut R,
    ) -> SealResult<Sourced<T>> {
        let sourced = read_sealed(input)?;
        let payload = self.open(&sourced.payload.into_sealed()?)?;
        Ok(Sourced::new(sourced.source_id, payload))
    }
}

impl std::fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel")
            .field("id", &self.id)
            .field("keyed", &self.is_keyed())
            .finish()
    }
}

/// Read a sourced envelope without decrypting it.
///
/// The payload is either a handshake public value or a sealed message that
/// must be opened with the channel registered for the source.
pub fn read_sealed<R: Read>(input: &mut R) -> SealResult<Sourced<Payload>> {
    bus::read_with_source(input)
}
