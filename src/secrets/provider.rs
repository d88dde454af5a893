//! Key material: Diffie-Hellman domain parameters, key pairs and channel keys.
//!
//! Uses:
//! - finite-field Diffie-Hellman over a safe prime (num-bigint)
//! - HKDF-SHA256 to turn the agreed group element into a channel key
//! - ChaCha20-Poly1305 sized (256-bit) symmetric keys
//!
//! Everything here is stateless apart from drawing from the OS random source.

use crate::bus;
use crate::error::{SealError, SealResult};
use bincode::Options;
use hkdf::Hkdf;
use num_bigint::{BigUint, RandBigInt};
use num_traits::{One, Zero};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Length in bytes of a channel key.
pub const SYMMETRIC_KEY_LEN: usize = 32;

/// Smallest prime size accepted by [`generate_dh_parameters`].
pub const MIN_PRIME_BITS: u64 = 32;

/// Cap on the private exponent size chosen for generated parameters.
pub const MAX_EXPONENT_BITS: u32 = 256;

const MILLER_RABIN_ROUNDS: usize = 32;

const KDF_SALT: &[u8] = b"sealbus/dh-agreement/v1";
const KDF_INFO: &[u8] = b"channel key";

const SMALL_PRIMES: [u32; 54] = [
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89,
    97, 101, 103, 107, 109, 113, 127, 131, 137, 139, 149, 151, 157, 163, 167, 173, 179, 181, 191,
    193, 197, 199, 211, 223, 227, 229, 233, 239, 241, 251,
];

mod biguint_bytes {
    use num_bigint::BigUint;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
        value.to_bytes_be().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
        let bytes = Vec::<u8>::deserialize(deserializer)?;
        Ok(BigUint::from_bytes_be(&bytes))
    }
}

/// Diffie-Hellman domain parameters shared by both ends of a handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhParameters {
    #[serde(with = "biguint_bytes")]
    prime: BigUint,
    #[serde(with = "biguint_bytes")]
    generator: BigUint,
    /// Size of the private exponent; 0 draws from the whole group.
    exponent_bits: u32,
}

impl DhParameters {
    /// Build parameters from known values.
    ///
    /// The prime is not tested for primality; parameters are only ever
    /// trusted by equality with a provisioned set.
    pub fn new(prime: BigUint, generator: BigUint, exponent_bits: u32) -> SealResult<Self> {
        let params = Self {
            prime,
            generator,
            exponent_bits,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn prime(&self) -> &BigUint {
        &self.prime
    }

    pub fn generator(&self) -> &BigUint {
        &self.generator
    }

    pub fn exponent_bits(&self) -> u32 {
        self.exponent_bits
    }

    /// Size of the prime in bits.
    pub fn bits(&self) -> u64 {
        self.prime.bits()
    }

    fn byte_len(&self) -> usize {
        ((self.prime.bits() + 7) / 8) as usize
    }

    fn validate(&self) -> SealResult<()> {
        let five = BigUint::from(5u32);
        if self.prime < five || (&self.prime % BigUint::from(2u32)).is_zero() {
            return Err(SealError::security("invalid DH prime"));
        }
        let two = BigUint::from(2u32);
        let upper = &self.prime - &two;
        if self.generator < two || self.generator > upper {
            return Err(SealError::security("invalid DH generator"));
        }
        if self.exponent_bits == 1 || u64::from(self.exponent_bits) >= self.prime.bits() {
            return Err(SealError::security(format!(
                "invalid exponent size: {} bits for a {}-bit prime",
                self.exponent_bits,
                self.prime.bits()
            )));
        }
        Ok(())
    }

    /// Whether `value` lies in `[2, p-2]`.
    fn contains(&self, value: &BigUint) -> bool {
        let two = BigUint::from(2u32);
        *value >= two && *value <= &self.prime - &two
    }
}

/// A party's public DH value `g^x mod p`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicValue {
    params: DhParameters,
    value: BigUint,
}

impl PublicValue {
    pub fn params(&self) -> &DhParameters {
        &self.params
    }

    pub fn value(&self) -> &BigUint {
        &self.value
    }

    /// Standard byte-encoded form.
    pub fn encode(&self) -> SealResult<Vec<u8>> {
        encode_public_value(self)
    }
}

/// A party's private DH exponent.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateValue {
    params: DhParameters,
    value: BigUint,
}

impl PrivateValue {
    pub fn params(&self) -> &DhParameters {
        &self.params
    }

    /// Matching public value.
    pub fn public_value(&self) -> PublicValue {
        PublicValue {
            params: self.params.clone(),
            value: self.params.generator.modpow(&self.value, &self.params.prime),
        }
    }
}

impl std::fmt::Debug for PrivateValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateValue")
            .field("bits", &self.params.bits())
            .finish_non_exhaustive()
    }
}

/// Public/private DH values over the same parameters.
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub public: PublicValue,
    pub private: PrivateValue,
}

impl KeyPair {
    /// Rebuild a key pair from a known private exponent.
    pub fn from_private(params: &DhParameters, x: BigUint) -> SealResult<Self> {
        if !params.contains(&x) {
            return Err(SealError::security("private value out of range"));
        }
        let private = PrivateValue {
            params: params.clone(),
            value: x,
        };
        Ok(Self {
            public: private.public_value(),
            private,
        })
    }

    /// Pair a decoded public value with its private value.
    pub fn from_parts(public: PublicValue, private: PrivateValue) -> SealResult<Self> {
        if private.public_value() != public {
            return Err(SealError::security("public and private values do not match"));
        }
        Ok(Self { public, private })
    }
}

/// Symmetric channel key.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; SYMMETRIC_KEY_LEN]);

impl SymmetricKey {
    pub fn from_bytes(bytes: [u8; SYMMETRIC_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SYMMETRIC_KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(<redacted>)")
    }
}

#[derive(Serialize, Deserialize)]
enum KeyEncoding {
    Public {
        params: DhParameters,
        value: Vec<u8>,
    },
    Private {
        params: DhParameters,
        value: Vec<u8>,
    },
}

impl Drop for KeyEncoding {
    fn drop(&mut self) {
        if let KeyEncoding::Private { value, .. } = self {
            value.zeroize();
        }
    }
}

fn fill_random(bytes: &mut [u8]) -> SealResult<()> {
    OsRng
        .try_fill_bytes(bytes)
        .map_err(|e| SealError::security(format!("random source unavailable: {}", e)))
}

fn is_probable_prime(n: &BigUint, rng: &mut OsRng) -> bool {
    let one = BigUint::one();
    let two = BigUint::from(2u32);
    if *n < two {
        return false;
    }
    for &p in SMALL_PRIMES.iter() {
        let p = BigUint::from(p);
        if *n == p {
            return true;
        }
        if (n % &p).is_zero() {
            return false;
        }
    }

    let n_minus_one = n - &one;
    let s = n_minus_one.trailing_zeros().unwrap_or(0);
    let d = &n_minus_one >> s as usize;

    'witness: for _ in 0..MILLER_RABIN_ROUNDS {
        let a = rng.gen_biguint_range(&two, &n_minus_one);
        let mut x = a.modpow(&d, n);
        if x == one || x == n_minus_one {
            continue;
        }
        for _ in 1..s {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

/// Cheap rejection of candidates with a small factor.
fn has_small_factor(n: &BigUint) -> bool {
    SMALL_PRIMES
        .iter()
        .any(|&p| (n % BigUint::from(p)).is_zero())
}

/// Generate new Diffie-Hellman parameters over a safe prime `p = 2q + 1`.
///
/// The generator is 4, which spans the subgroup of prime order `q`.
pub fn generate_dh_parameters(bit_length: u64) -> SealResult<DhParameters> {
    if bit_length < MIN_PRIME_BITS {
        return Err(SealError::security(format!(
            "unsupported prime size: {} bits (minimum {})",
            bit_length, MIN_PRIME_BITS
        )));
    }

    let mut rng = OsRng;
    let one = BigUint::one();
    let top = &one << (bit_length - 2) as usize;
    let prime = loop {
        let q = rng.gen_biguint(bit_length - 1) | &top | &one;
        let p = (&q << 1usize) + &one;
        if has_small_factor(&q) || has_small_factor(&p) {
            continue;
        }
        if is_probable_prime(&q, &mut rng) && is_probable_prime(&p, &mut rng) {
            break p;
        }
    };

    let exponent_bits = std::cmp::min(bit_length - 1, u64::from(MAX_EXPONENT_BITS)) as u32;
    DhParameters::new(prime, BigUint::from(4u32), exponent_bits)
}

/// Generate a fresh key pair over `params`.
pub fn generate_key_pair(params: &DhParameters) -> SealResult<KeyPair> {
    params.validate()?;
    let mut rng = OsRng;
    let x = if params.exponent_bits == 0 {
        let two = BigUint::from(2u32);
        rng.gen_biguint_range(&two, &(&params.prime - BigUint::one()))
    } else {
        let bits = u64::from(params.exponent_bits);
        rng.gen_biguint(bits) | (BigUint::one() << (bits - 1) as usize)
    };
    KeyPair::from_private(params, x)
}

/// Generate a random channel key.
pub fn generate_symmetric_key() -> SealResult<SymmetricKey> {
    let mut bytes = [0u8; SYMMETRIC_KEY_LEN];
    fill_random(&mut bytes)?;
    Ok(SymmetricKey(bytes))
}

/// Derive the channel key from our private value and the peer's public value.
pub fn derive_shared_key(private: &PrivateValue, peer: &PublicValue) -> SealResult<SymmetricKey> {
    if private.params != peer.params {
        return Err(SealError::security("DH parameters mismatch"));
    }
    let params = &private.params;
    if !params.contains(&peer.value) {
        return Err(SealError::security("peer public value out of range"));
    }

    let agreed = peer.value.modpow(&private.value, &params.prime);
    if agreed <= BigUint::one() {
        return Err(SealError::security("degenerate shared secret"));
    }

    // Fixed-width big-endian form so both sides feed identical bytes.
    let raw = Zeroizing::new(agreed.to_bytes_be());
    let mut ikm = Zeroizing::new(vec![0u8; params.byte_len()]);
    let offset = ikm.len() - raw.len();
    ikm[offset..].copy_from_slice(&raw);

    let hk = Hkdf::<Sha256>::new(Some(KDF_SALT), &ikm);
    let mut okm = [0u8; SYMMETRIC_KEY_LEN];
    hk.expand(KDF_INFO, &mut okm)
        .map_err(|_| SealError::security("key derivation failed"))?;
    let key = SymmetricKey(okm);
    okm.zeroize();
    Ok(key)
}

pub fn encode_dh_parameters(params: &DhParameters) -> SealResult<Vec<u8>> {
    bus::codec()
        .serialize(params)
        .map_err(SealError::from_key_codec)
}

pub fn decode_dh_parameters(bytes: &[u8]) -> SealResult<DhParameters> {
    let params: DhParameters = bus::codec()
        .deserialize(bytes)
        .map_err(SealError::from_key_codec)?;
    params.validate()?;
    Ok(params)
}

pub fn encode_public_value(public: &PublicValue) -> SealResult<Vec<u8>> {
    bus::codec()
        .serialize(&KeyEncoding::Public {
            params: public.params.clone(),
            value: public.value.to_bytes_be(),
        })
        .map_err(SealError::from_key_codec)
}

pub fn decode_public_value(bytes: &[u8]) -> SealResult<PublicValue> {
    let encoding: KeyEncoding = bus::codec()
        .deserialize(bytes)
        .map_err(SealError::from_key_codec)?;
    match &encoding {
        KeyEncoding::Public { params, value } => {
            params.validate()?;
            let value = BigUint::from_bytes_be(value);
            if !params.contains(&value) {
                return Err(SealError::security("public value out of range"));
            }
            Ok(PublicValue {
                params: params.clone(),
                value,
            })
        }
        KeyEncoding::Private { .. } => Err(SealError::security(
            "expected a public value encoding, got a private one",
        )),
    }
}

pub fn encode_private_value(private: &PrivateValue) -> SealResult<Zeroizing<Vec<u8>>> {
    let encoding = KeyEncoding::Private {
        params: private.params.clone(),
        value: private.value.to_bytes_be(),
    };
    bus::codec()
        .serialize(&encoding)
        .map(Zeroizing::new)
        .map_err(SealError::from_key_codec)
}

pub fn decode_private_value(bytes: &[u8]) -> SealResult<PrivateValue> {
    let encoding: KeyEncoding = bus::codec()
        .deserialize(bytes)
        .map_err(SealError::from_key_codec)?;
    match &encoding {
        KeyEncoding::Private { params, value } => {
            params.validate()?;
            let value = BigUint::from_bytes_be(value);
            if !params.contains(&value) {
                return Err(SealError::security("private value out of range"));
            }
            Ok(PrivateValue {
                params: params.clone(),
                value,
            })
        }
        KeyEncoding::Public { .. } => Err(SealError::security(
            "expected a private value encoding, got a public one",
        )),
    }
}

pub fn encode_symmetric_key(key: &SymmetricKey) -> Zeroizing<Vec<u8>> {
    Zeroizing::new(key.0.to_vec())
}

pub fn decode_symmetric_key(bytes: &[u8]) -> SealResult<SymmetricKey> {
    if bytes.len() != SYMMETRIC_KEY_LEN {
        return Err(SealError::security(format!(
            "invalid symmetric key length: {} bytes",
            bytes.len()
        )));
    }
    let mut key = [0u8; SYMMETRIC_KEY_LEN];
    key.copy_from_slice(bytes);
    Ok(SymmetricKey(key))
}
