//! Addresses, key management and signature verification.
//!
//! Addresses are base58-encoded Ed25519 public keys. Verification is exposed
//! through [`SignatureVerifier`] so the marketplace can treat it as a pure
//! function supplied by its host.

use std::fmt;
use std::str::FromStr;

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::MoltError;

/// Length of an address in raw bytes.
pub const ADDRESS_LEN: usize = 32;

/// A marketplace account address (base58-encoded 32-byte public key).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(String);

impl Address {
    /// Parses and validates a base58 address.
    ///
    /// # Errors
    ///
    /// Returns `MoltError::InvalidAddress` if the string is not valid base58
    /// or does not decode to 32 bytes.
    pub fn from_base58(s: &str) -> Result<Self, MoltError> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| MoltError::InvalidAddress(format!("invalid base58: {e}")))?;

        if bytes.len() != ADDRESS_LEN {
            return Err(MoltError::InvalidAddress(format!(
                "address must be {ADDRESS_LEN} bytes, got {}",
                bytes.len()
            )));
        }

        Ok(Self(s.to_string()))
    }

    /// Builds an address from raw public key bytes.
    #[must_use]
    pub fn from_bytes(bytes: &[u8; ADDRESS_LEN]) -> Self {
        Self(bs58::encode(bytes).into_string())
    }

    /// Returns the base58 text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decodes the raw public key bytes.
    ///
    /// # Errors
    ///
    /// Returns `MoltError::InvalidAddress` if the stored text is not an address.
    pub fn to_bytes(&self) -> Result<[u8; ADDRESS_LEN], MoltError> {
        let bytes = bs58::decode(&self.0)
            .into_vec()
            .map_err(|e| MoltError::InvalidAddress(format!("invalid base58: {e}")))?;
        bytes
            .try_into()
            .map_err(|_| MoltError::InvalidAddress(format!("{} is not 32 bytes", self.0)))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = MoltError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base58(s)
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_base58(&s).map_err(de::Error::custom)
    }
}

/// An Ed25519 keypair owning an [`Address`].
#[derive(Debug)]
pub struct Wallet {
    signing_key: SigningKey,
    address: Address,
}

impl Wallet {
    /// Creates a wallet with a randomly generated keypair.
    #[must_use]
    pub fn new() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    /// Restores a wallet from raw signing key bytes.
    #[must_use]
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(bytes))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let address = Address::from_bytes(signing_key.verifying_key().as_bytes());
        Self {
            signing_key,
            address,
        }
    }

    /// Returns the wallet address.
    #[must_use]
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Signs a message, returning the 64-byte signature.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing_key.sign(message).to_bytes().to_vec()
    }
}

impl Default for Wallet {
    fn default() -> Self {
        Self::new()
    }
}

/// Verifies that `signature` over `message` was produced by `signer`.
///
/// Implementations must be pure: the same inputs always give the same answer.
pub trait SignatureVerifier: Send + Sync + fmt::Debug {
    /// Checks a signature.
    ///
    /// # Errors
    ///
    /// Returns `MoltError::InvalidSignature` if verification fails and
    /// `MoltError::InvalidAddress` if the signer cannot be decoded.
    fn verify(&self, signer: &Address, message: &[u8], signature: &[u8]) -> Result<(), MoltError>;
}

/// Strict Ed25519 verification against the signer's address key.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, signer: &Address, message: &[u8], signature: &[u8]) -> Result<(), MoltError> {
        let key = VerifyingKey::from_bytes(&signer.to_bytes()?)
            .map_err(|e| MoltError::Crypto(e.to_string()))?;
        let signature =
            Signature::from_slice(signature).map_err(|_| MoltError::InvalidSignature)?;
        key.verify_strict(message, &signature)
            .map_err(|_| MoltError::InvalidSignature)
    }
}
