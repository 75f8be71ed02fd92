//! Sealed envelope.
//!
//! Every piece of ciphertext this crate produces or persists (session
//! messages, group messages, pickled account and session state) is wrapped
//! in a [`Sealed`] envelope that carries the format tag and nonce.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{CryptoError, Result};
use crate::keys::{kdf, MessageKey, MessageNonce};

/// Format identifier for sealed data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EncryptionFormat {
    /// ChaCha20-Poly1305 with 256-bit key.
    ChaCha20Poly1305 = 1,
}

/// An AEAD ciphertext plus the metadata needed to open it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sealed {
    pub format: EncryptionFormat,
    pub nonce: MessageNonce,
    /// Includes the authentication tag.
    pub ciphertext: Vec<u8>,
}

impl Sealed {
    /// Encrypt plaintext with the given key.
    pub fn seal(plaintext: &[u8], key: &MessageKey) -> Result<Self> {
        let nonce = MessageNonce::generate();
        let ciphertext = key.encrypt(plaintext, &nonce)?;
        Ok(Self {
            format: EncryptionFormat::ChaCha20Poly1305,
            nonce,
            ciphertext,
        })
    }

    /// Decrypt with the given key.
    pub fn open(&self, key: &MessageKey) -> Result<Vec<u8>> {
        match self.format {
            EncryptionFormat::ChaCha20Poly1305 => key.decrypt(&self.ciphertext, &self.nonce),
        }
    }

    /// CBOR-encode `value`, then seal it.
    pub fn seal_value<T: Serialize>(value: &T, key: &MessageKey) -> Result<Self> {
        Self::seal(&to_cbor(value)?, key)
    }

    /// Open and CBOR-decode.
    pub fn open_value<T: DeserializeOwned>(&self, key: &MessageKey) -> Result<T> {
        from_cbor(&self.open(key)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        to_cbor(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        from_cbor(bytes)
    }
}

/// Key that seals persisted account and session state.
#[derive(Clone)]
pub struct PickleKey(MessageKey);

impl PickleKey {
    /// Derive from an application-supplied secret of any length.
    pub fn derive(secret: &[u8]) -> Self {
        Self(MessageKey::from_bytes(kdf("strand-pickle-v1", &[secret])))
    }

    /// Seal a value into storable bytes.
    pub fn pickle<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Sealed::seal_value(value, &self.0)?.to_bytes()
    }

    /// Inverse of [`PickleKey::pickle`].
    pub fn unpickle<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        Sealed::from_bytes(bytes)?.open_value(&self.0)
    }
}

impl std::fmt::Debug for PickleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PickleKey(..)")
    }
}

pub(crate) fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| CryptoError::SerializationError(e.to_string()))?;
    Ok(buf)
}

pub(crate) fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::from_reader(bytes).map_err(|e| CryptoError::SerializationError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open() {
        let key = MessageKey::generate();
        let sealed = Sealed::seal(b"hello, sealed world!", &key).unwrap();
        assert_eq!(sealed.open(&key).unwrap(), b"hello, sealed world!");
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = Sealed::seal(b"secret", &MessageKey::generate()).unwrap();
        assert!(sealed.open(&MessageKey::generate()).is_err());
    }

    #[test]
    fn test_pickle_requires_same_secret() {
        let pickle_key = PickleKey::derive(b"device secret");
        let bytes = pickle_key.pickle(&vec![1u32, 2, 3]).unwrap();

        let back: Vec<u32> = PickleKey::derive(b"device secret").unpickle(&bytes).unwrap();
        assert_eq!(back, vec![1, 2, 3]);

        let wrong = PickleKey::derive(b"other secret").unpickle::<Vec<u32>>(&bytes);
        assert!(wrong.is_err());
    }
}
