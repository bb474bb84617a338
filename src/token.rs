//! Signed opt-out tokens.
//!
//! A token binds an `(email, company_id, list)` tuple to the process signing key:
//!
//! ```text
//! v1.<base64url(json [email, company_id, list])>.<base64url(hmac-sha256)>
//! ```
//!
//! The tag covers the version prefix and the encoded payload, so a token cannot be
//! re-labelled under another format version. Tokens carry no expiry; rotating the
//! signing key is the only way to invalidate them.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;
use std::fmt;
use thiserror::Error;

use crate::models::normalize_email;

/// Signing key length in bytes (512 bits).
pub const KEY_LENGTH: usize = 64;

/// Iteration count used when deriving the key from a master secret.
pub const KDF_ITERATIONS: u32 = 1000;

/// Context label mixed into the derivation so other consumers of the master
/// secret never end up with the same key.
pub const KDF_LABEL: &[u8] = b"mailkick";

const TOKEN_VERSION: &str = "v1";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("missing {0}")]
    InvalidArgument(&'static str),
    #[error("invalid signature")]
    InvalidSignature,
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("secret token must be {expected} hex characters, got {actual}")]
    Length { expected: usize, actual: usize },
    #[error("secret token is not valid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("master secret is empty")]
    EmptyMasterSecret,
}

/// Process-wide secret used to sign and verify tokens.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningKey([u8; KEY_LENGTH]);

impl SigningKey {
    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Parse an operator-supplied key written as 128 hex characters.
    pub fn from_hex(value: &str) -> Result<Self, KeyError> {
        let value = value.trim();
        if value.len() != KEY_LENGTH * 2 {
            return Err(KeyError::Length {
                expected: KEY_LENGTH * 2,
                actual: value.len(),
            });
        }

        let mut bytes = [0u8; KEY_LENGTH];
        hex::decode_to_slice(value, &mut bytes)?;
        Ok(Self(bytes))
    }

    /// Derive the key from an application master secret with PBKDF2-HMAC-SHA1.
    ///
    /// Iterations, digest and label are fixed, so every process sharing the
    /// master secret derives the same key.
    pub fn derive(master_secret: &str) -> Result<Self, KeyError> {
        if master_secret.is_empty() {
            return Err(KeyError::EmptyMasterSecret);
        }

        let mut bytes = [0u8; KEY_LENGTH];
        pbkdf2::pbkdf2_hmac::<Sha1>(
            master_secret.as_bytes(),
            KDF_LABEL,
            KDF_ITERATIONS,
            &mut bytes,
        );
        Ok(Self(bytes))
    }

    /// Random key, for tests and throwaway deployments.
    pub fn random() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; KEY_LENGTH];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningKey(..)")
    }
}

/// Identity recovered from a verified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    pub email: String,
    pub company_id: i64,
    pub list: String,
}

/// Generates and verifies signed opt-out tokens.
#[derive(Debug, Clone)]
pub struct TokenCodec {
    key: SigningKey,
}

impl TokenCodec {
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }

    pub fn generate(&self, email: &str, company_id: i64, list: &str) -> Result<String, TokenError> {
        let email = normalize_email(email);
        if email.is_empty() {
            return Err(TokenError::InvalidArgument("email"));
        }
        if list.trim().is_empty() {
            return Err(TokenError::InvalidArgument("list"));
        }

        let payload = serde_json::to_vec(&(email.as_str(), company_id, list))
            .map_err(|_| TokenError::InvalidArgument("payload"))?;
        let signing_input = format!("{}.{}", TOKEN_VERSION, URL_SAFE_NO_PAD.encode(payload));
        let tag = self.mac(&signing_input).finalize().into_bytes();

        Ok(format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(tag)))
    }

    /// Verify a token and return the identity it encodes.
    ///
    /// Every failure (bad tag, unknown version, malformed payload) yields
    /// [`TokenError::InvalidSignature`].
    pub fn verify(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let (signing_input, tag) = token
            .rsplit_once('.')
            .ok_or(TokenError::InvalidSignature)?;
        let (version, payload) = signing_input
            .split_once('.')
            .ok_or(TokenError::InvalidSignature)?;

        if version != TOKEN_VERSION {
            return Err(TokenError::InvalidSignature);
        }

        let tag = URL_SAFE_NO_PAD
            .decode(tag)
            .map_err(|_| TokenError::InvalidSignature)?;
        self.mac(signing_input)
            .verify_slice(&tag)
            .map_err(|_| TokenError::InvalidSignature)?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| TokenError::InvalidSignature)?;
        let (email, company_id, list): (String, i64, String) =
            serde_json::from_slice(&payload).map_err(|_| TokenError::InvalidSignature)?;

        if email.is_empty() || list.is_empty() {
            return Err(TokenError::InvalidSignature);
        }

        Ok(TokenClaims {
            email,
            company_id,
            list,
        })
    }

    fn mac(&self, signing_input: &str) -> HmacSha256 {
        // HMAC accepts keys of any length
        let mut mac = <HmacSha256 as Mac>::new_from_slice(self.key.as_bytes())
            .unwrap_or_else(|_| unreachable!("hmac key length is unrestricted"));
        mac.update(signing_input.as_bytes());
        mac
    }
}
