//! Envelope codec: reads and writes serde values to/from byte streams and
//! files.
//!
//! Every frame is a bincode record. A sourced envelope is the source
//! identifier followed by the payload, in that order, with no field tags.

use crate::error::{SealError, SealResult};
use crate::secrets::channel::CipherText;
use bincode::Options;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Identifier for an anonymous guest source.
pub const GUEST_ID: &str = "urn:sealbus:guest";

/// Upper bound on a single decoded frame.
pub const MAX_FRAME_LEN: u64 = 16 * 1024 * 1024;

pub(crate) fn codec() -> impl Options {
    bincode::DefaultOptions::new().with_limit(MAX_FRAME_LEN)
}

/// Associates a payload with the identifier of the peer that wrote it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sourced<T> {
    pub source_id: String,
    pub payload: T,
}

impl<T> Sourced<T> {
    pub fn new<S: Into<String>>(source_id: S, payload: T) -> Self {
        Self {
            source_id: source_id.into(),
            payload,
        }
    }

    /// Whether the payload comes from the anonymous guest source.
    pub fn is_anonymous(&self) -> bool {
        self.source_id == GUEST_ID
    }
}

/// What an envelope carries on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// Encoded DH public value; a handshake message.
    PublicValue(Vec<u8>),
    /// Application message sealed under a channel key.
    Sealed(CipherText),
}

impl Payload {
    pub fn into_public_value(self) -> SealResult<Vec<u8>> {
        match self {
            Self::PublicValue(bytes) => Ok(bytes),
            Self::Sealed(_) => Err(SealError::data("expected a public value, got a sealed payload")),
        }
    }

    pub fn into_sealed(self) -> SealResult<CipherText> {
        match self {
            Self::Sealed(sealed) => Ok(sealed),
            Self::PublicValue(_) => Err(SealError::data("expected a sealed payload, got a public value")),
        }
    }
}

/// Serializes a value to a stream.
pub fn write<W: Write, T: Serialize + ?Sized>(out: &mut W, data: &T) -> SealResult<()> {
    codec()
        .serialize_into(&mut *out, data)
        .map_err(SealError::from_envelope_codec)?;
    out.flush()?;
    Ok(())
}

/// Deserializes a value from a stream.
pub fn read<R: Read, T: DeserializeOwned>(input: &mut R) -> SealResult<T> {
    codec()
        .deserialize_from(input)
        .map_err(SealError::from_envelope_codec)
}

/// Serializes a value along with the identifier of its source.
pub fn write_with_source<W: Write, T: Serialize>(
    source_id: &str,
    out: &mut W,
    data: &T,
) -> SealResult<()> {
    write(
        out,
        &Sourced {
            source_id: source_id.to_string(),
            payload: data,
        },
    )
}

/// Deserializes a value along with the identifier of its source.
pub fn read_with_source<R: Read, T: DeserializeOwned>(input: &mut R) -> SealResult<Sourced<T>> {
    read(input)
}

/// Serializes a value to a file, replacing its content.
pub fn write_file<P: AsRef<Path>, T: Serialize + ?Sized>(path: P, data: &T) -> SealResult<()> {
    let mut out = BufWriter::new(File::create(path)?);
    write(&mut out, data)
}

/// Deserializes a value from a file.
pub fn read_file<P: AsRef<Path>, T: DeserializeOwned>(path: P) -> SealResult<T> {
    let mut input = BufReader::new(File::open(path)?);
    read(&mut input)
}

/// Uppercase hexadecimal rendering, for diagnostics.
pub fn to_hex(bytes: &[u8]) -> String {
    hex::encode_upper(bytes)
}

/// Short fingerprint of a public value for log lines.
pub fn fingerprint(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(bytes);
    hex::encode(&digest[..6])
}
