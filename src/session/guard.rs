//! Steam Guard one-time codes.

use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::common::error::AuthError;

const CODE_CHARS: &[u8] = b"23456789BCDFGHJKMNPQRTVWXY";
const CODE_LEN: usize = 5;
const TIME_STEP_SECS: i64 = 30;

/// Generate the mobile authenticator code for `unix_time`.
pub fn generate_auth_code(shared_secret: &str, unix_time: i64) -> Result<String, AuthError> {
    let key = base64::engine::general_purpose::STANDARD
        .decode(shared_secret.trim())
        .map_err(|e| AuthError::InvalidSharedSecret(e.to_string()))?;

    let mut mac = Hmac::<Sha1>::new_from_slice(&key)
        .map_err(|e| AuthError::InvalidSharedSecret(e.to_string()))?;
    let step = (unix_time / TIME_STEP_SECS) as u64;
    mac.update(&step.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    // Dynamic truncation
    let offset = (digest[19] & 0x0F) as usize;
    let mut value = u32::from_be_bytes([
        digest[offset],
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]) & 0x7FFF_FFFF;

    let mut code = String::with_capacity(CODE_LEN);
    for _ in 0..CODE_LEN {
        code.push(CODE_CHARS[(value as usize) % CODE_CHARS.len()] as char);
        value /= CODE_CHARS.len() as u32;
    }
    Ok(code)
}

/// Where guard codes come from, in priority order.
#[derive(Debug, Clone, Default)]
pub struct GuardCodeSource {
    shared_secret: Option<String>,
    one_shot: Option<String>,
}

impl GuardCodeSource {
    pub fn new(shared_secret: Option<String>, one_shot: Option<String>) -> Self {
        Self {
            shared_secret: shared_secret.filter(|s| !s.trim().is_empty()),
            one_shot: one_shot.filter(|s| !s.trim().is_empty()),
        }
    }

    pub fn has_secret(&self) -> bool {
        self.shared_secret.is_some()
    }

    /// Next code to send: a fresh TOTP code if a secret is configured,
    /// otherwise the one-shot code, consumed exactly once.
    pub fn next_code(&mut self, unix_time: i64) -> Result<Option<String>, AuthError> {
        if let Some(secret) = &self.shared_secret {
            return generate_auth_code(secret, unix_time).map(Some);
        }
        Ok(self.one_shot.take())
    }
}
