//! Per-file secrets.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, CryptoResult};

/// Size of a file secret in bytes.
pub const SECRET_SIZE: usize = 32;

const DERIVATION_DOMAIN: &[u8] = b"synctool-public-object-key\0";

/// Symmetric key protecting exactly one uploaded object.
///
/// Serialized as base64 so keyrings can persist it as plain JSON.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct FileSecret {
    bytes: [u8; SECRET_SIZE],
}

impl FileSecret {
    /// Generates a fresh random secret.
    pub fn generate() -> Self {
        let mut bytes = [0u8; SECRET_SIZE];
        rand::rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn from_bytes(bytes: [u8; SECRET_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn from_slice(slice: &[u8]) -> CryptoResult<Self> {
        let bytes: [u8; SECRET_SIZE] =
            slice
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: SECRET_SIZE,
                    actual: slice.len(),
                })?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; SECRET_SIZE] {
        &self.bytes
    }

    /// Derives the secret of an object stored under a published key.
    ///
    /// Objects in public containers announce a key on their stream; every
    /// reader derives the same secret from it, the container and the object id.
    pub fn derive_from_public_key(
        public_key: &[u8],
        container_id: &str,
        object_id: &str,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(DERIVATION_DOMAIN);
        hasher.update(public_key);
        hasher.update((container_id.len() as u64).to_be_bytes());
        hasher.update(container_id.as_bytes());
        hasher.update(object_id.as_bytes());
        Self {
            bytes: hasher.finalize().into(),
        }
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.bytes)
    }

    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        let mut decoded = BASE64
            .decode(encoded)
            .map_err(|e| CryptoError::Decryption(format!("secret is not valid base64: {e}")))?;
        let secret = Self::from_slice(&decoded);
        decoded.zeroize();
        secret
    }
}

impl PartialEq for FileSecret {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for FileSecret {}

impl std::fmt::Debug for FileSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FileSecret(<redacted>)")
    }
}

impl Serialize for FileSecret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for FileSecret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Self::from_base64(&encoded).map_err(serde::de::Error::custom)
    }
}
