//! Per-run SSH key pair generation.
//!
//! The public half is handed to the source endpoint's SSH daemon and the
//! private half to the destination's transfer job. Neither is ever written to
//! disk by this crate; the private key lives in a zeroizing buffer and is
//! dropped with the run.

use std::fmt;
use std::str::FromStr;

use rand_core::OsRng;
use ssh_key::private::{Ed25519Keypair, KeypairData, RsaKeypair};
use ssh_key::{LineEnding, PrivateKey};
use thiserror::Error;
use zeroize::Zeroizing;

const RSA_KEY_BITS: usize = 2048;
const KEY_COMMENT: &str = "pv-migrate";

/// Supported key pair algorithms.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum KeyAlgorithm {
    /// Ed25519 keys.
    #[default]
    Ed25519,
    /// 2048-bit RSA keys.
    Rsa,
}

impl KeyAlgorithm {
    /// Lower-case name, as accepted by [`FromStr`].
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ed25519 => "ed25519",
            Self::Rsa => "rsa",
        }
    }

    /// Path inside the transfer container where the private key is mounted.
    #[must_use]
    pub fn private_key_mount_path(self) -> String {
        format!("/root/.ssh/id_{}", self.as_str())
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyAlgorithm {
    type Err = KeyGenerationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ed25519" => Ok(Self::Ed25519),
            "rsa" => Ok(Self::Rsa),
            _ => Err(KeyGenerationError::UnsupportedAlgorithm {
                algorithm: value.to_owned(),
            }),
        }
    }
}

/// A freshly generated OpenSSH key pair.
#[derive(Clone)]
pub struct KeyPair {
    algorithm: KeyAlgorithm,
    public_key: String,
    private_key: Zeroizing<String>,
}

impl KeyPair {
    /// Algorithm used to derive the pair.
    #[must_use]
    pub const fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    /// Public key in `authorized_keys` format.
    #[must_use]
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Private key in OpenSSH PEM format.
    #[must_use]
    pub fn private_key(&self) -> &str {
        self.private_key.as_str()
    }

    /// Where the destination endpoint mounts the private key.
    #[must_use]
    pub fn private_key_mount_path(&self) -> String {
        self.algorithm.private_key_mount_path()
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("algorithm", &self.algorithm)
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Errors raised while generating a key pair.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum KeyGenerationError {
    /// Raised when the algorithm name is not recognised.
    #[error("unsupported key algorithm '{algorithm}' (expected ed25519 or rsa)")]
    UnsupportedAlgorithm {
        /// Name supplied by the caller.
        algorithm: String,
    },
    /// Raised when the underlying generator or encoder fails.
    #[error("failed to generate {algorithm} key pair: {message}")]
    Generation {
        /// Algorithm being generated.
        algorithm: KeyAlgorithm,
        /// Message from the key library.
        message: String,
    },
}

/// Generates a fresh key pair for `algorithm`.
///
/// # Errors
///
/// Returns [`KeyGenerationError::Generation`] when key generation or OpenSSH
/// encoding fails.
pub fn create_key_pair(algorithm: KeyAlgorithm) -> Result<KeyPair, KeyGenerationError> {
    let failed = |err: ssh_key::Error| KeyGenerationError::Generation {
        algorithm,
        message: err.to_string(),
    };

    let keypair_data = match algorithm {
        KeyAlgorithm::Ed25519 => KeypairData::from(Ed25519Keypair::random(&mut OsRng)),
        KeyAlgorithm::Rsa => {
            KeypairData::from(RsaKeypair::random(&mut OsRng, RSA_KEY_BITS).map_err(failed)?)
        }
    };
    let private = PrivateKey::new(keypair_data, KEY_COMMENT).map_err(failed)?;
    let public_key = private.public_key().to_openssh().map_err(failed)?;
    let private_key = private.to_openssh(LineEnding::LF).map_err(failed)?;

    Ok(KeyPair {
        algorithm,
        public_key,
        private_key,
    })
}
