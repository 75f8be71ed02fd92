//! Cryptographic primitives for Strand.
//!
//! Wraps secp256k1 recoverable signing and Keccak-256 domain hashing with
//! strong types.

use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;

use crate::error::CoreError;
use crate::types::{byte_array, Address, EventHash};

/// Header for event hashes: ASCII `CSBLANCA`.
const HASH_HEADER: &[u8; 8] = b"CSBLANCA";
/// Header for snapshot hashes: ASCII `SNAPSHOT`.
const SNAPSHOT_HEADER: &[u8; 8] = b"SNAPSHOT";
const HASH_SEPARATOR: &[u8; 8] = b"ABCDEFG>";
const HASH_FOOTER: &[u8; 8] = b"<GFEDCBA";

/// Length of a compact signature plus recovery byte.
pub const SIGNATURE_LEN: usize = 65;
/// Length of an uncompressed SEC1 public key.
pub const PUBLIC_KEY_LEN: usize = 65;

fn framed_hash(header: &[u8; 8], data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(header);
    hasher.update((data.len() as u64).to_le_bytes());
    hasher.update(HASH_SEPARATOR);
    hasher.update(data);
    hasher.update(HASH_FOOTER);
    hasher.finalize().into()
}

/// Domain-separated Keccak-256 over `data`.
///
/// Layout: `CSBLANCA || len_le64 || ABCDEFG> || data || <GFEDCBA`.
pub fn domain_hash(data: &[u8]) -> EventHash {
    EventHash(framed_hash(HASH_HEADER, data))
}

/// Same framing as [`domain_hash`] with the `SNAPSHOT` header.
pub fn snapshot_hash(data: &[u8]) -> EventHash {
    EventHash(framed_hash(SNAPSHOT_HEADER, data))
}

/// Plain Keccak-256.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

fn check_len(what: &'static str, bytes: &[u8], expected: usize) -> Result<(), CoreError> {
    if bytes.len() != expected {
        return Err(CoreError::InvalidLength {
            what,
            expected,
            got: bytes.len(),
        });
    }
    Ok(())
}

/// An uncompressed secp256k1 public key (65 bytes, leading `0x04`).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "byte_array")] pub [u8; PUBLIC_KEY_LEN]);

impl PublicKey {
    /// Create from raw uncompressed bytes, checking the point is on the curve.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        check_len("public key", bytes, PUBLIC_KEY_LEN)?;
        if bytes[0] != 0x04 {
            return Err(CoreError::BadPublicKey("missing 0x04 prefix".into()));
        }
        VerifyingKey::from_sec1_bytes(bytes)
            .map_err(|_| CoreError::BadPublicKey("not a curve point".into()))?;
        let mut arr = [0u8; PUBLIC_KEY_LEN];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// Parse the `0x04` + 128 hex character string form.
    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        if !s.starts_with("0x04") || s.len() != 2 + PUBLIC_KEY_LEN * 2 {
            return Err(CoreError::BadPublicKey(s.to_string()));
        }
        let bytes = hex::decode(&s[2..]).map_err(|_| CoreError::BadPublicKey(s.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }

    /// Convert to the `0x04...` hex string.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// The account address for this key.
    pub fn to_address(&self) -> Address {
        // 65-byte keys always pass the length check
        public_key_to_address(&self.0).unwrap_or(Address([0u8; 20]))
    }

    fn to_verifying_key(&self) -> Result<VerifyingKey, CoreError> {
        VerifyingKey::from_sec1_bytes(&self.0)
            .map_err(|_| CoreError::BadPublicKey(self.to_hex()))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}...)", &self.to_hex()[..18])
    }
}

impl AsRef<[u8]> for PublicKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A 65-byte recoverable signature: compact `r || s` followed by the recovery id.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(#[serde(with = "byte_array")] pub [u8; SIGNATURE_LEN]);

impl Signature {
    /// Create from raw bytes, checking the length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CoreError> {
        check_len("signature", bytes, SIGNATURE_LEN)?;
        let mut arr = [0u8; SIGNATURE_LEN];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; SIGNATURE_LEN] {
        &self.0
    }

    /// The recovery byte.
    pub const fn recovery_id(&self) -> u8 {
        self.0[64]
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}...)", &self.to_hex()[..16])
    }
}

impl AsRef<[u8]> for Signature {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A secp256k1 keypair for signing event hashes.
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut rand::rngs::OsRng),
        }
    }

    /// Create from a 32-byte secret scalar.
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Result<Self, CoreError> {
        let signing_key = SigningKey::from_slice(secret)
            .map_err(|_| CoreError::BadPublicKey("secret scalar out of range".into()))?;
        Ok(Self { signing_key })
    }

    /// Get the uncompressed public key.
    pub fn public_key(&self) -> PublicKey {
        let point = self.signing_key.verifying_key().to_encoded_point(false);
        let mut arr = [0u8; PUBLIC_KEY_LEN];
        arr.copy_from_slice(point.as_bytes());
        PublicKey(arr)
    }

    /// The account address of this keypair.
    pub fn address(&self) -> Address {
        self.public_key().to_address()
    }

    /// Sign a 32-byte hash, appending the recovery id.
    pub fn sign(&self, hash: &[u8]) -> Result<Signature, CoreError> {
        check_len("hash", hash, 32)?;
        let (sig, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(hash)
            .map_err(|e| CoreError::SigningFailed(e.to_string()))?;
        let mut arr = [0u8; SIGNATURE_LEN];
        arr[..64].copy_from_slice(&sig.to_bytes());
        arr[64] = recovery_id.to_byte();
        Ok(Signature(arr))
    }

    /// Get the raw secret scalar (secret key material).
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes().into()
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keypair({})", self.address())
    }
}

/// Verify `signature` over `hash` against `public_key`.
///
/// Only the first 64 bytes of the signature take part in verification.
pub fn verify_signature(
    hash: &[u8],
    signature: &[u8],
    public_key: &PublicKey,
) -> Result<bool, CoreError> {
    check_len("hash", hash, 32)?;
    check_len("signature", signature, SIGNATURE_LEN)?;
    let sig = match EcdsaSignature::from_slice(&signature[..64]) {
        Ok(sig) => sig,
        Err(_) => return Ok(false),
    };
    let key = public_key.to_verifying_key()?;
    Ok(key.verify_prehash(hash, &sig).is_ok())
}

/// Recover the uncompressed public key that produced `signature` over `hash`.
pub fn recover_public_key(hash: &[u8], signature: &[u8]) -> Result<PublicKey, CoreError> {
    check_len("hash", hash, 32)?;
    check_len("signature", signature, SIGNATURE_LEN)?;
    let sig = EcdsaSignature::from_slice(&signature[..64]).map_err(|_| CoreError::RecoveryFailed)?;
    let recovery_id = RecoveryId::from_byte(signature[64]).ok_or(CoreError::RecoveryFailed)?;
    let key = VerifyingKey::recover_from_prehash(hash, &sig, recovery_id)
        .map_err(|_| CoreError::RecoveryFailed)?;
    let point = key.to_encoded_point(false);
    let mut arr = [0u8; PUBLIC_KEY_LEN];
    arr.copy_from_slice(point.as_bytes());
    Ok(PublicKey(arr))
}

/// Derive the account address of a raw 64- or 65-byte public key.
pub fn public_key_to_address(public_key: &[u8]) -> Result<Address, CoreError> {
    let raw = match public_key.len() {
        65 => &public_key[1..],
        64 => public_key,
        got => {
            return Err(CoreError::InvalidLength {
                what: "public key",
                expected: 65,
                got,
            })
        }
    };
    let digest = keccak256(raw);
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&digest[12..]);
    Ok(Address(addr))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_one() -> Keypair {
        let mut secret = [0u8; 32];
        secret[31] = 1;
        Keypair::from_secret_bytes(&secret).unwrap()
    }

    #[test]
    fn test_domain_hash_vectors() {
        assert_eq!(
            hex::encode(domain_hash(b"").0),
            "b8708b7c9869887f0b0b7e8b12954b683c0c74796d93b94e90da87cacd303030"
        );
        assert_eq!(
            hex::encode(domain_hash(b"hello").0),
            "31819ac309b1248649eb311f437797ef74121e0322a27cc0618c7ccbae730072"
        );
        assert_eq!(
            hex::encode(snapshot_hash(b"hello").0),
            "faae1cd30a46d527e5f2b793aec0c79c34aeeb9e9378d41477eb4c97584e9e86"
        );
    }

    #[test]
    fn test_domain_hash_sensitivity() {
        let base = b"some event bytes".to_vec();
        let h = domain_hash(&base);
        assert_eq!(h, domain_hash(&base));
        for i in 0..base.len() {
            let mut flipped = base.clone();
            flipped[i] ^= 0x01;
            assert_ne!(h, domain_hash(&flipped));
        }
        assert_ne!(domain_hash(b"hello"), snapshot_hash(b"hello"));
    }

    #[test]
    fn test_address_of_secret_one() {
        assert_eq!(
            key_one().address().to_hex(),
            "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf"
        );
    }

    #[test]
    fn test_sign_recover_verify() {
        let keypair = Keypair::generate();
        let hash = domain_hash(b"payload");
        let sig = keypair.sign(hash.as_bytes()).unwrap();

        assert!(sig.recovery_id() <= 1);
        let recovered = recover_public_key(hash.as_bytes(), sig.as_bytes()).unwrap();
        assert_eq!(recovered, keypair.public_key());
        assert!(verify_signature(hash.as_bytes(), sig.as_bytes(), &keypair.public_key()).unwrap());

        let other = domain_hash(b"other");
        assert!(!verify_signature(other.as_bytes(), sig.as_bytes(), &keypair.public_key()).unwrap());
    }

    #[test]
    fn test_length_checks() {
        let keypair = Keypair::generate();
        assert!(keypair.sign(&[0u8; 31]).is_err());
        assert!(recover_public_key(&[0u8; 32], &[0u8; 64]).is_err());
        assert!(verify_signature(&[0u8; 33], &[0u8; 65], &keypair.public_key()).is_err());
    }

    #[test]
    fn test_public_key_hex() {
        let pk = key_one().public_key();
        let hex = pk.to_hex();
        assert!(hex.starts_with("0x04"));
        assert_eq!(hex.len(), 132);
        assert_eq!(PublicKey::from_hex(&hex).unwrap(), pk);

        assert!(PublicKey::from_hex(&hex[..131]).is_err());
        assert!(PublicKey::from_hex(&hex.replacen("0x04", "0x05", 1)).is_err());
        assert!(PublicKey::from_hex("0x04").is_err());
    }

    #[test]
    fn test_public_key_to_address_accepts_raw_64() {
        let pk = key_one().public_key();
        let a = public_key_to_address(&pk.0).unwrap();
        let b = public_key_to_address(&pk.0[1..]).unwrap();
        assert_eq!(a, b);
        assert!(public_key_to_address(&pk.0[..33]).is_err());
    }
}
