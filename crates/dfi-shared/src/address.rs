//! Node addresses.
//!
//! An address is `BLAKE2b-160(SHA3-256(public_key))`. It identifies a peer in
//! the DHT and doubles as an opaque content address. Closeness between two
//! addresses is their XOR, compared as a big-endian integer.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::OnceLock;

use blake2::digest::consts::U20;
use blake2::{Blake2b, Digest};
use rand::RngCore;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::Sha3_256;

use crate::constants::{ADDRESS_SIZE, ADDRESS_VERSION, PUBKEY_SIZE};
use crate::error::AddressError;

type Blake2b160 = Blake2b<U20>;

/// Highest bucket index, returned for the distance of an address to itself.
pub const MAX_LEADING_ZEROES: usize = ADDRESS_SIZE * 8 - 1;

#[derive(Clone, Default)]
pub struct Address {
    raw: [u8; ADDRESS_SIZE],
    encoded: OnceLock<String>,
}

impl Address {
    /// Derive the address of a 32-byte public key.
    pub fn generate(public_key: &[u8]) -> Result<Self, AddressError> {
        if public_key.len() != PUBKEY_SIZE {
            return Err(AddressError::InvalidKeyLength(public_key.len()));
        }

        let first = Sha3_256::digest(public_key);
        let second = Blake2b160::digest(first);

        let mut raw = [0u8; ADDRESS_SIZE];
        raw.copy_from_slice(&second);
        Ok(Self::from_raw(raw))
    }

    /// A uniformly random address, used for picking search targets.
    pub fn random() -> Self {
        let mut seed = [0u8; PUBKEY_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut seed);
        // seed is always 32 bytes
        Self::generate(&seed).unwrap_or_default()
    }

    pub fn from_raw(raw: [u8; ADDRESS_SIZE]) -> Self {
        Self {
            raw,
            encoded: OnceLock::new(),
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, AddressError> {
        let raw: [u8; ADDRESS_SIZE] = bytes
            .try_into()
            .map_err(|_| AddressError::InvalidLength(bytes.len()))?;
        Ok(Self::from_raw(raw))
    }

    /// Parse the base58check text form.
    pub fn decode(value: &str) -> Result<Self, AddressError> {
        let data = bs58::decode(value)
            .with_check(Some(ADDRESS_VERSION))
            .into_vec()
            .map_err(|e| AddressError::Encoding(e.to_string()))?;

        // the decoded payload still carries the version byte
        match data.split_first() {
            Some((_, payload)) => Self::from_slice(payload),
            None => Err(AddressError::InvalidLength(0)),
        }
    }

    pub fn raw(&self) -> &[u8; ADDRESS_SIZE] {
        &self.raw
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Base58check text form, computed once and memoized.
    pub fn encode(&self) -> &str {
        self.encoded.get_or_init(|| {
            bs58::encode(self.raw)
                .with_check_version(ADDRESS_VERSION)
                .into_string()
        })
    }

    pub fn xor(&self, other: &Address) -> Address {
        let mut raw = [0u8; ADDRESS_SIZE];
        for (i, byte) in raw.iter_mut().enumerate() {
            *byte = self.raw[i] ^ other.raw[i];
        }
        Self::from_raw(raw)
    }

    /// Index of the first set bit, most significant bit first.
    ///
    /// Only meaningful on the result of [`Address::xor`], where it selects the
    /// k-bucket. An all-zero address (self distance) yields
    /// [`MAX_LEADING_ZEROES`].
    pub fn leading_zeroes(&self) -> usize {
        for (i, byte) in self.raw.iter().enumerate() {
            if *byte != 0 {
                return i * 8 + byte.leading_zeros() as usize;
            }
        }
        MAX_LEADING_ZEROES
    }

    pub fn less(&self, other: &Address) -> bool {
        self.raw < other.raw
    }

    pub fn equals(&self, other: &Address) -> bool {
        self.raw == other.raw
    }

    /// Short prefix of the encoded form for log lines.
    pub fn short(&self) -> String {
        self.encode().chars().take(8).collect()
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl PartialOrd for Address {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Address {
    fn cmp(&self, other: &Self) -> Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.encode())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.encode())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

// Text form for JSON, raw bytes for MessagePack and bincode.
impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(self.encode())
        } else {
            serializer.serialize_bytes(&self.raw)
        }
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            Address::decode(&s).map_err(D::Error::custom)
        } else {
            let bytes = serde_bytes::ByteBuf::deserialize(deserializer)?;
            Address::from_slice(&bytes).map_err(D::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_deterministic() {
        let key = [7u8; 32];
        let a = Address::generate(&key).unwrap();
        let b = Address::generate(&key).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.raw().len(), ADDRESS_SIZE);

        let other = Address::generate(&[8u8; 32]).unwrap();
        assert_ne!(a, other);
    }

    #[test]
    fn test_generate_rejects_bad_key_length() {
        assert_eq!(
            Address::generate(&[1u8; 31]),
            Err(AddressError::InvalidKeyLength(31))
        );
        assert!(Address::generate(&[1u8; 33]).is_err());
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        for _ in 0..32 {
            let addr = Address::random();
            let decoded = Address::decode(addr.encode()).unwrap();
            assert_eq!(addr, decoded);
        }

        let zero = Address::from_raw([0u8; ADDRESS_SIZE]);
        assert_eq!(Address::decode(zero.encode()).unwrap(), zero);
    }

    #[test]
    fn test_decode_rejects_corruption() {
        let addr = Address::random();
        let mut text = addr.encode().to_string();
        let last = text.pop().unwrap();
        text.push(if last == '2' { '3' } else { '2' });
        assert!(Address::decode(&text).is_err());
        assert!(Address::decode("not base58 0OIl").is_err());
    }

    #[test]
    fn test_xor_self_inverse() {
        let a = Address::random();
        let b = Address::random();
        assert_eq!(a.xor(&b).xor(&b), a);

        let zero = a.xor(&a);
        assert_eq!(zero.raw(), &[0u8; ADDRESS_SIZE]);
        assert_eq!(zero.leading_zeroes(), MAX_LEADING_ZEROES);
    }

    #[test]
    fn test_leading_zeroes() {
        let mut raw = [0u8; ADDRESS_SIZE];
        raw[0] = 0x80;
        assert_eq!(Address::from_raw(raw).leading_zeroes(), 0);

        raw[0] = 0x01;
        assert_eq!(Address::from_raw(raw).leading_zeroes(), 7);

        let mut raw = [0u8; ADDRESS_SIZE];
        raw[2] = 0x10;
        assert_eq!(Address::from_raw(raw).leading_zeroes(), 19);

        let mut raw = [0u8; ADDRESS_SIZE];
        raw[19] = 0x01;
        assert_eq!(Address::from_raw(raw).leading_zeroes(), 159);
    }

    #[test]
    fn test_less_is_big_endian() {
        let mut lo = [0u8; ADDRESS_SIZE];
        let mut hi = [0u8; ADDRESS_SIZE];
        lo[19] = 0xff;
        hi[0] = 0x01;
        let lo = Address::from_raw(lo);
        let hi = Address::from_raw(hi);

        assert!(lo.less(&hi));
        assert!(!hi.less(&lo));
        assert!(!lo.less(&lo));
        assert_eq!(lo.cmp(&hi), Ordering::Less);
    }

    #[test]
    fn test_serde_forms() {
        let addr = Address::random();

        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"{}\"", addr.encode()));
        assert_eq!(serde_json::from_str::<Address>(&json).unwrap(), addr);

        let packed = rmp_serde::to_vec(&addr).unwrap();
        assert_eq!(rmp_serde::from_slice::<Address>(&packed).unwrap(), addr);
    }
}
