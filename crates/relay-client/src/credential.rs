//! Credential selection and the authentication payload.
//!
//! A bearer token is preferred. When none is available the fixed fallback
//! API key is presented instead; that is the only automatic downgrade.

use std::fmt;

use relay_core::events::{Frame, names};
use serde_json::{Value, json};

/// Credential presented when a link is established.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Bearer token issued to the signed-in user.
    Token(String),
    /// Fixed fallback API key.
    ApiKey(String),
}

impl Credential {
    /// Pick the token if present and non-empty, otherwise the fallback key.
    pub fn resolve(token: Option<&str>, fallback_api_key: &str) -> Self {
        match token {
            Some(t) if !t.is_empty() => Self::Token(t.to_owned()),
            _ => Self::ApiKey(fallback_api_key.to_owned()),
        }
    }

    /// Whether this is the fallback key rather than a bearer token.
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::ApiKey(_))
    }

    /// `{ "token": .. }` or `{ "apiKey": .. }`.
    pub fn auth_payload(&self) -> Value {
        match self {
            Self::Token(token) => json!({ "token": token }),
            Self::ApiKey(key) => json!({ "apiKey": key }),
        }
    }

    /// First frame sent on every link.
    pub fn auth_frame(&self) -> Frame {
        Frame::new(names::AUTH, self.auth_payload())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token(_) => f.write_str("Token(<redacted>)"),
            Self::ApiKey(_) => f.write_str("ApiKey(<redacted>)"),
        }
    }
}
