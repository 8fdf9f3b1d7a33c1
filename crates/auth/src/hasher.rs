//! One-way credential hashing.
//!
//! The default [`Pbkdf2Hasher`] derives keys with PBKDF2 over HMAC-SHA-256
//! and encodes every parameter next to the derived key:
//!
//! ```text
//! pbkdf2$sha256$<iterations>$<base64 salt>$<base64 key>
//! ```
//!
//! Verification reads the parameters back from the encoding, so it never
//! depends on the hasher's current configuration.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

const ENCODING_SCHEME: &str = "pbkdf2";
const HASH_FUNCTION: &str = "sha256";
const FIELD_SEPARATOR: char = '$';

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HashError {
    /// The encoded hash could not be parsed or names another scheme.
    #[error("password: invalid hash")]
    InvalidHash,

    #[error("password: invalid config: {0}")]
    InvalidConfig(&'static str),
}

/// Credential hashing contract.
pub trait Hasher: Send + Sync {
    /// Hash a secret into a self-describing encoded string.
    fn hash(&self, secret: &str) -> Result<String, HashError>;

    /// Check a secret against an encoded hash.
    ///
    /// `Ok(false)` means "well-formed hash, wrong secret"; a malformed
    /// encoding is always `Err(HashError::InvalidHash)`.
    fn verify(&self, secret: &str, encoded_hash: &str) -> Result<bool, HashError>;
}

impl<H> Hasher for std::sync::Arc<H>
where
    H: Hasher + ?Sized,
{
    fn hash(&self, secret: &str) -> Result<String, HashError> {
        (**self).hash(secret)
    }

    fn verify(&self, secret: &str, encoded_hash: &str) -> Result<bool, HashError> {
        (**self).verify(secret, encoded_hash)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Pbkdf2Options {
    pub iterations: u32,
    pub salt_len: usize,
    pub key_len: usize,
}

impl Default for Pbkdf2Options {
    fn default() -> Self {
        Self {
            iterations: 120_000,
            salt_len: 16,
            key_len: 32,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Pbkdf2Hasher {
    options: Pbkdf2Options,
}

impl Pbkdf2Hasher {
    /// Zero-valued options fall back to their defaults.
    pub fn new(options: Pbkdf2Options) -> Self {
        let defaults = Pbkdf2Options::default();
        Self {
            options: Pbkdf2Options {
                iterations: if options.iterations == 0 {
                    defaults.iterations
                } else {
                    options.iterations
                },
                salt_len: if options.salt_len == 0 {
                    defaults.salt_len
                } else {
                    options.salt_len
                },
                key_len: if options.key_len == 0 {
                    defaults.key_len
                } else {
                    options.key_len
                },
            },
        }
    }

    pub fn options(&self) -> Pbkdf2Options {
        self.options
    }
}

impl Hasher for Pbkdf2Hasher {
    fn hash(&self, secret: &str) -> Result<String, HashError> {
        if secret.is_empty() {
            return Err(HashError::InvalidConfig("secret must not be empty"));
        }

        let mut salt = vec![0u8; self.options.salt_len];
        rand::rng().fill_bytes(&mut salt);

        let derived = derive_key(secret, &salt, self.options.iterations, self.options.key_len);

        Ok(format!(
            "{ENCODING_SCHEME}${HASH_FUNCTION}${}${}${}",
            self.options.iterations,
            STANDARD_NO_PAD.encode(&salt),
            STANDARD_NO_PAD.encode(&derived),
        ))
    }

    fn verify(&self, secret: &str, encoded_hash: &str) -> Result<bool, HashError> {
        if secret.is_empty() {
            return Err(HashError::InvalidConfig("secret must not be empty"));
        }

        let parsed = EncodedHash::parse(encoded_hash)?;
        if parsed.scheme != ENCODING_SCHEME || parsed.function != HASH_FUNCTION {
            return Err(HashError::InvalidHash);
        }

        let candidate = derive_key(secret, &parsed.salt, parsed.iterations, parsed.key.len());
        Ok(bool::from(candidate.as_slice().ct_eq(parsed.key.as_slice())))
    }
}

struct EncodedHash<'a> {
    scheme: &'a str,
    function: &'a str,
    iterations: u32,
    salt: Vec<u8>,
    key: Vec<u8>,
}

impl<'a> EncodedHash<'a> {
    fn parse(encoded: &'a str) -> Result<Self, HashError> {
        let parts: Vec<&str> = encoded.split(FIELD_SEPARATOR).collect();
        let [scheme, function, iterations, salt, key] = parts.as_slice() else {
            return Err(HashError::InvalidHash);
        };

        let iterations: u32 = iterations.parse().map_err(|_| HashError::InvalidHash)?;
        if iterations == 0 {
            return Err(HashError::InvalidHash);
        }

        let salt = STANDARD_NO_PAD.decode(salt).map_err(|_| HashError::InvalidHash)?;
        let key = STANDARD_NO_PAD.decode(key).map_err(|_| HashError::InvalidHash)?;
        if salt.is_empty() || key.is_empty() {
            return Err(HashError::InvalidHash);
        }

        Ok(Self {
            scheme,
            function,
            iterations,
            salt,
            key,
        })
    }
}

fn derive_key(secret: &str, salt: &[u8], iterations: u32, key_len: usize) -> Vec<u8> {
    let mut derived = vec![0u8; key_len];
    pbkdf2::pbkdf2_hmac::<Sha256>(secret.as_bytes(), salt, iterations, &mut derived);
    derived
}
