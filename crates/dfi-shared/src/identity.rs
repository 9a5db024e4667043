use std::path::Path;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use tracing::info;

use crate::address::Address;
use crate::constants::{PUBKEY_SIZE, SIGNATURE_SIZE};
use crate::error::IdentityError;

/// A node's Ed25519 identity. The address is derived from the public key.
#[derive(Clone)]
pub struct Identity {
    signing_key: SigningKey,
    address: Address,
}

impl Identity {
    /// Generate a new random identity
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    /// Restore identity from secret key bytes
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(secret))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let public = signing_key.verifying_key().to_bytes();
        // a verifying key is always 32 bytes
        let address = Address::generate(&public).unwrap_or_default();
        Self {
            signing_key,
            address,
        }
    }

    /// Load the hex-encoded secret at `path`, or create one there.
    pub fn load_or_generate(path: &Path) -> Result<Self, IdentityError> {
        if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| IdentityError::KeyFile(e.to_string()))?;
            let bytes =
                hex::decode(text.trim()).map_err(|e| IdentityError::KeyFile(e.to_string()))?;
            let secret: [u8; 32] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| IdentityError::InvalidKeyBytes)?;
            return Ok(Self::from_secret_bytes(&secret));
        }

        let identity = Self::generate();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| IdentityError::KeyFile(e.to_string()))?;
        }
        std::fs::write(path, hex::encode(identity.secret_bytes()))
            .map_err(|e| IdentityError::KeyFile(e.to_string()))?;
        info!(address = %identity.address, "Generated new identity");
        Ok(identity)
    }

    pub fn address(&self) -> Address {
        self.address.clone()
    }

    /// Get the raw public key bytes
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Get the raw secret key bytes
    pub fn secret_bytes(&self) -> &[u8; 32] {
        self.signing_key.as_bytes()
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    /// Get the verifying (public) key
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }
}

/// Verify a signature given as raw bytes against a raw public key.
pub fn verify_signature(
    pubkey_bytes: &[u8],
    message: &[u8],
    signature: &[u8],
) -> Result<(), IdentityError> {
    let key: [u8; PUBKEY_SIZE] = pubkey_bytes
        .get(..PUBKEY_SIZE)
        .and_then(|k| k.try_into().ok())
        .ok_or(IdentityError::InvalidKeyBytes)?;
    let verifying_key = VerifyingKey::from_bytes(&key).map_err(|_| IdentityError::InvalidKeyBytes)?;

    if signature.len() < SIGNATURE_SIZE {
        return Err(IdentityError::InvalidSignature);
    }
    let signature = Signature::from_slice(&signature[..SIGNATURE_SIZE])
        .map_err(|_| IdentityError::InvalidSignature)?;

    verifying_key
        .verify(message, &signature)
        .map_err(|_| IdentityError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_address_matches_key() {
        let id = Identity::generate();
        let derived = Address::generate(&id.public_key_bytes()).unwrap();
        assert_eq!(id.address(), derived);
    }

    #[test]
    fn test_identity_roundtrip() {
        let id = Identity::generate();
        let restored = Identity::from_secret_bytes(id.secret_bytes());
        assert_eq!(id.address(), restored.address());
        assert_eq!(id.public_key_bytes(), restored.public_key_bytes());
    }

    #[test]
    fn test_sign_verify() {
        let id = Identity::generate();
        let message = b"cookie bytes";
        let signature = id.sign(message).to_bytes();

        assert!(verify_signature(&id.public_key_bytes(), message, &signature).is_ok());
        assert!(verify_signature(&id.public_key_bytes(), b"wrong", &signature).is_err());
        assert!(verify_signature(&id.public_key_bytes(), message, &signature[..10]).is_err());
        assert!(verify_signature(&[0u8; 4], message, &signature).is_err());
    }

    #[test]
    fn test_load_or_generate_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("node.key");

        let first = Identity::load_or_generate(&path).unwrap();
        assert!(path.exists());
        let second = Identity::load_or_generate(&path).unwrap();
        assert_eq!(first.address(), second.address());
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.key");
        std::fs::write(&path, "zz-not-hex").unwrap();
        assert!(Identity::load_or_generate(&path).is_err());

        std::fs::write(&path, "abcd").unwrap();
        assert!(matches!(
            Identity::load_or_generate(&path),
            Err(IdentityError::InvalidKeyBytes)
        ));
    }
}
