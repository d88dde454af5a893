//! Persisted key material.
//!
//! Each file holds one encoded value written through the envelope codec:
//! `*.dh` parameters, `*.pv` public value, `*.x` private value, `*.key`
//! symmetric key.

use crate::bus;
use crate::error::{SealError, SealResult};
use crate::secrets::provider::{
    decode_dh_parameters, decode_private_value, decode_public_value, decode_symmetric_key,
    encode_dh_parameters, encode_private_value, encode_public_value, encode_symmetric_key,
    generate_key_pair, DhParameters, KeyPair, PrivateValue, PublicValue, SymmetricKey,
};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::debug;
use zeroize::Zeroizing;

pub const DH_PARAMS_EXT: &str = "dh";
pub const PUBLIC_VALUE_EXT: &str = "pv";
pub const PRIVATE_VALUE_EXT: &str = "x";
pub const SYMMETRIC_KEY_EXT: &str = "key";

fn with_suffix(prefix: &Path, ext: &str) -> PathBuf {
    let mut name = OsString::from(prefix.as_os_str());
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

/// `<prefix>.pv` and `<prefix>.x`.
pub fn key_pair_paths(prefix: &Path) -> (PathBuf, PathBuf) {
    (
        with_suffix(prefix, PUBLIC_VALUE_EXT),
        with_suffix(prefix, PRIVATE_VALUE_EXT),
    )
}

pub fn write_dh_parameters(params: &DhParameters, path: &Path) -> SealResult<()> {
    bus::write_file(path, encode_dh_parameters(params)?.as_slice())
}

pub fn read_dh_parameters(path: &Path) -> SealResult<DhParameters> {
    let encoded: Vec<u8> = bus::read_file(path)?;
    decode_dh_parameters(&encoded)
}

pub fn write_public_value(public: &PublicValue, path: &Path) -> SealResult<()> {
    bus::write_file(path, encode_public_value(public)?.as_slice())
}

pub fn read_public_value(path: &Path) -> SealResult<PublicValue> {
    let encoded: Vec<u8> = bus::read_file(path)?;
    decode_public_value(&encoded)
}

pub fn write_private_value(private: &PrivateValue, path: &Path) -> SealResult<()> {
    let encoded = encode_private_value(private)?;
    bus::write_file(path, encoded.as_slice())
}

pub fn read_private_value(path: &Path) -> SealResult<PrivateValue> {
    let encoded = Zeroizing::new(bus::read_file::<_, Vec<u8>>(path)?);
    decode_private_value(&encoded)
}

pub fn write_symmetric_key(key: &SymmetricKey, path: &Path) -> SealResult<()> {
    let encoded = encode_symmetric_key(key);
    bus::write_file(path, encoded.as_slice())
}

pub fn read_symmetric_key(path: &Path) -> SealResult<SymmetricKey> {
    let encoded = Zeroizing::new(bus::read_file::<_, Vec<u8>>(path)?);
    decode_symmetric_key(&encoded)
}

/// Write `<prefix>.pv` and `<prefix>.x`, then read both back and check that
/// they still form a pair.
pub fn write_key_pair(pair: &KeyPair, prefix: &Path) -> SealResult<KeyPair> {
    let (pv, x) = key_pair_paths(prefix);
    write_public_value(&pair.public, &pv)?;
    write_private_value(&pair.private, &x)?;

    let back = KeyPair::from_parts(read_public_value(&pv)?, read_private_value(&x)?)?;
    if back.public != pair.public {
        return Err(SealError::security(format!(
            "key pair read back from {} differs from the one written",
            prefix.display()
        )));
    }
    debug!("Wrote key pair {} / {}", pv.display(), x.display());
    Ok(back)
}

/// Generate a key pair over `params` and persist it under `prefix`.
pub fn create_key_pair_files(params: &DhParameters, prefix: &Path) -> SealResult<KeyPair> {
    write_key_pair(&generate_key_pair(params)?, prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::secrets::provider::generate_symmetric_key;
    use crate::secrets::provider::tests::test_params;

    #[test]
    fn test_key_pair_paths_append_suffix() {
        let (pv, x) = key_pair_paths(Path::new("keys/bob.v1"));
        assert_eq!(pv, PathBuf::from("keys/bob.v1.pv"));
        assert_eq!(x, PathBuf::from("keys/bob.v1.x"));
    }

    #[test]
    fn test_create_key_pair_files() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("bob");
        let pair = create_key_pair_files(&test_params(), &prefix).unwrap();

        let (pv, x) = key_pair_paths(&prefix);
        assert_eq!(read_public_value(&pv).unwrap(), pair.public);
        assert_eq!(read_private_value(&x).unwrap(), pair.private);
    }

    #[test]
    fn test_parameters_and_key_files() {
        let dir = tempfile::tempdir().unwrap();

        let dh = dir.path().join("group.dh");
        write_dh_parameters(&test_params(), &dh).unwrap();
        assert_eq!(read_dh_parameters(&dh).unwrap(), test_params());

        let path = dir.path().join("channel.key");
        let key = generate_symmetric_key().unwrap();
        write_symmetric_key(&key, &path).unwrap();
        assert_eq!(read_symmetric_key(&path).unwrap(), key);
    }

    #[test]
    fn test_public_file_is_not_a_private_file() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("bob");
        create_key_pair_files(&test_params(), &prefix).unwrap();
        let (pv, x) = key_pair_paths(&prefix);

        assert_eq!(read_private_value(&pv).unwrap_err().kind(), ErrorKind::Security);
        assert_eq!(read_public_value(&x).unwrap_err().kind(), ErrorKind::Security);
    }
}
