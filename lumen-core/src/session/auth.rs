//! Optional pre-stream authentication.
//!
//! Keys are kept only as blake3 digests; a request is accepted when the
//! digest of the presented key matches the stored one for that id.

use std::collections::HashMap;

use crate::error::LumenError;
use crate::protocol::auth::AuthRequest;

#[derive(Debug, Clone, Default)]
pub struct AuthGate {
    required: bool,
    credentials: HashMap<String, blake3::Hash>,
}

impl AuthGate {
    /// A gate that accepts every connection without an exchange.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn new<I, K, V>(credentials: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<[u8]>,
    {
        Self {
            required: true,
            credentials: credentials
                .into_iter()
                .map(|(id, key)| (id.into(), blake3::hash(key.as_ref())))
                .collect(),
        }
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn verify(&self, request: &AuthRequest) -> Result<(), LumenError> {
        if !self.required {
            return Ok(());
        }
        let presented = blake3::hash(request.key.as_bytes());
        match self.credentials.get(&request.id) {
            // `blake3::Hash` equality is constant-time.
            Some(expected) if *expected == presented => Ok(()),
            _ => Err(LumenError::AuthFailed(request.id.clone())),
        }
    }
}
