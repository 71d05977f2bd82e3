//! Key pair generation and passphrase encryption at rest.
//!
//! Keys are RSA, held in memory as PKCS#8 and persisted only as
//! `ENCRYPTED PRIVATE KEY` PEM (PBES2 with PBKDF2-HMAC-SHA256 and
//! AES-256-CBC, the same container `openssl genrsa -aes256` produces).

use std::fmt;

use pkcs8::der::pem::PemLabel;
use pkcs8::pkcs5::pbes2;
use pkcs8::{EncryptedPrivateKeyInfo, LineEnding, PrivateKeyInfo, SecretDocument};
use rand::RngCore;
use rand::rngs::OsRng;
use rsa::RsaPrivateKey;
use rsa::pkcs8::EncodePrivateKey;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};
use crate::types::Passphrase;

/// Smallest accepted RSA modulus.
pub const MIN_KEY_BITS: usize = 2048;

/// Largest accepted RSA modulus.
pub const MAX_KEY_BITS: usize = 16384;

/// Modulus used for CA keys unless configured otherwise.
pub const DEFAULT_KEY_BITS: usize = 4096;

/// PBKDF2 rounds used when encrypting keys.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Generates an RSA key pair of `bits` bits.
///
/// The passphrase is only checked here; the key is encrypted when the caller
/// persists it with [`KeyMaterial::to_encrypted_pem`].
///
/// # Errors
///
/// Returns [`Error::KeyGeneration`] for an unsupported size, an empty
/// passphrase, or a failure of the random source.
pub fn generate(bits: usize, passphrase: &Passphrase) -> Result<KeyMaterial> {
    if !(MIN_KEY_BITS..=MAX_KEY_BITS).contains(&bits) {
        return Err(Error::KeyGeneration(format!(
            "unsupported key size {bits}, must be between {MIN_KEY_BITS} and {MAX_KEY_BITS} bits"
        )));
    }
    if passphrase.is_empty() {
        return Err(Error::KeyGeneration("passphrase must not be empty".into()));
    }

    debug!(bits, "generating RSA key pair");
    let private_key = RsaPrivateKey::new(&mut OsRng, bits)
        .map_err(|e| Error::KeyGeneration(format!("RSA generation failed: {e}")))?;
    let der = private_key
        .to_pkcs8_der()
        .map_err(|e| Error::KeyGeneration(format!("PKCS#8 encoding failed: {e}")))?;

    KeyMaterial::from_pkcs8_der(der.as_bytes().to_vec())
}

/// A private key and its public half.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    /// PKCS#8 DER private key.
    pkcs8: Vec<u8>,
    /// DER SubjectPublicKeyInfo.
    public_key: Vec<u8>,
}

impl KeyMaterial {
    /// Wraps an unencrypted PKCS#8 DER private key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyGeneration`] if the key cannot be used for signing.
    pub fn from_pkcs8_der(pkcs8: Vec<u8>) -> Result<Self> {
        let key_pair = rcgen::KeyPair::try_from(pkcs8.as_slice())
            .map_err(|e| Error::KeyGeneration(format!("unusable private key: {e}")))?;
        let public_key = key_pair.public_key_der();
        Ok(Self { pkcs8, public_key })
    }

    /// Decrypts an `ENCRYPTED PRIVATE KEY` PEM block.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyDecryption`] for malformed input or a wrong passphrase.
    pub fn from_encrypted_pem(pem: &str, passphrase: &Passphrase) -> Result<Self> {
        let (label, document) = SecretDocument::from_pem(pem)
            .map_err(|e| Error::KeyDecryption(format!("malformed PEM: {e}")))?;
        EncryptedPrivateKeyInfo::validate_pem_label(label)
            .map_err(|_| Error::KeyDecryption(format!("unexpected PEM label '{label}'")))?;

        let encrypted = EncryptedPrivateKeyInfo::try_from(document.as_bytes())
            .map_err(|e| Error::KeyDecryption(format!("malformed key container: {e}")))?;
        let decrypted = encrypted
            .decrypt(passphrase.expose())
            .map_err(|_| Error::KeyDecryption("wrong passphrase or corrupted key".into()))?;

        Self::from_pkcs8_der(decrypted.as_bytes().to_vec())
            .map_err(|e| Error::KeyDecryption(e.to_string()))
    }

    /// Encrypts the key with `passphrase` and returns it as PEM.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyGeneration`] for an empty passphrase or if
    /// encryption fails.
    pub fn to_encrypted_pem(&self, passphrase: &Passphrase) -> Result<String> {
        if passphrase.is_empty() {
            return Err(Error::KeyGeneration(
                "refusing to store a private key without a passphrase".into(),
            ));
        }

        let mut salt = [0u8; 16];
        let mut iv = [0u8; 16];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut iv);

        let params = pbes2::Parameters::pbkdf2_sha256_aes256cbc(PBKDF2_ITERATIONS, &salt, &iv)
            .map_err(|e| Error::KeyGeneration(format!("invalid PBES2 parameters: {e}")))?;
        let info = PrivateKeyInfo::try_from(self.pkcs8.as_slice())
            .map_err(|e| Error::KeyGeneration(format!("malformed PKCS#8 key: {e}")))?;
        let encrypted = info
            .encrypt_with_params(params, passphrase.expose())
            .map_err(|e| Error::KeyGeneration(format!("key encryption failed: {e}")))?;
        let pem = encrypted
            .to_pem(EncryptedPrivateKeyInfo::PEM_LABEL, LineEnding::LF)
            .map_err(|e| Error::KeyGeneration(format!("PEM encoding failed: {e}")))?;

        Ok(pem.as_str().to_owned())
    }

    /// Returns an rcgen key pair for signing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Signing`] if the key cannot be loaded.
    pub fn signing_key(&self) -> Result<rcgen::KeyPair> {
        rcgen::KeyPair::try_from(self.pkcs8.as_slice())
            .map_err(|e| Error::Signing(format!("failed to load signing key: {e}")))
    }

    /// Returns the DER-encoded SubjectPublicKeyInfo.
    #[must_use]
    pub fn public_key_der(&self) -> &[u8] {
        &self.public_key
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("private_key", &"[REDACTED]")
            .field("public_key_len", &self.public_key.len())
            .finish()
    }
}
