//! JWT-shaped token values and their decoded claims.
//!
//! Tokens here are the `"<header>.<payload>"` pair handed out by the
//! repository's token endpoints. The signature segment never reaches this
//! crate and nothing is cryptographically verified; the only questions a
//! `Token` answers are "what do your claims say" and "are you inside your
//! lifetime window".

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use chrono::Utc;
use serde::Deserialize;

/// Whether `Token::is_valid` enforces the `nbf < now < exp` lifetime window.
///
/// Kept as a named constant so the policy is explicit and pinned by tests:
/// with enforcement off every token would report valid and the refresh path
/// of the session service would never run.
pub const ENFORCE_LIFETIME_WINDOW: bool = true;

/// Which of the two session token slots a token occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenRole {
    Access,
    Refresh,
}

impl TokenRole {
    /// Name used for the `${tokenName}` substitution in storage keys.
    pub fn as_str(self) -> &'static str {
        match self {
            TokenRole::Access => "access",
            TokenRole::Refresh => "refresh",
        }
    }
}

/// Decoded token payload. Fields default to zero/empty when the payload is
/// missing a claim or cannot be decoded at all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Claims {
    #[serde(default, rename = "sub")]
    pub subject: String,
    /// Username the token was issued to.
    #[serde(default)]
    pub name: String,
    /// Issued-at, epoch seconds.
    #[serde(default, rename = "iat")]
    pub issued_at: i64,
    /// Not-valid-before, epoch seconds.
    #[serde(default, rename = "nbf")]
    pub not_before: i64,
    /// Expiry, epoch seconds.
    #[serde(default, rename = "exp")]
    pub expires_at: i64,
    #[serde(default, rename = "aud")]
    pub audience: String,
    #[serde(default, rename = "iss")]
    pub issuer: String,
}

/// An immutable access or refresh token.
///
/// Replacing a token means constructing a new one; nothing here mutates.
/// Cheap to clone and safe to share across tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    header: String,
    payload: String,
}

impl Token {
    /// Build a token from a `"<header>.<payload>"` string.
    ///
    /// Splits on the first `.`; input without a dot becomes a token with an
    /// empty payload. No validation happens here, a garbage string simply
    /// yields a token whose claims decode to zero.
    pub fn from_encoded(head_and_payload: &str) -> Self {
        match head_and_payload.split_once('.') {
            Some((header, payload)) => Self {
                header: header.to_string(),
                payload: payload.to_string(),
            },
            None => Self {
                header: head_and_payload.to_string(),
                payload: String::new(),
            },
        }
    }

    /// The "no token" value: both segments empty, serializes to `"."`.
    pub fn empty() -> Self {
        Self {
            header: String::new(),
            payload: String::new(),
        }
    }

    /// Reconstruct the wire form. Round-trips with [`Token::from_encoded`].
    pub fn serialize(&self) -> String {
        format!("{}.{}", self.header, self.payload)
    }

    /// Decode the payload segment into claims.
    ///
    /// Malformed base64 or JSON degrades to `Claims::default()`; this never
    /// fails. Recomputed on each call, which is fine because the encoded
    /// source is immutable.
    pub fn claims(&self) -> Claims {
        decode_segment(&self.payload)
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default()
    }

    /// Whether the current time falls inside the token's lifetime window
    /// (`not_before < now < expires_at`). See [`ENFORCE_LIFETIME_WINDOW`].
    ///
    /// The empty token's claims decode to zero, so it is never valid.
    pub fn is_valid(&self) -> bool {
        if !ENFORCE_LIFETIME_WINDOW {
            return true;
        }
        let claims = self.claims();
        let now = Utc::now().timestamp();
        claims.not_before < now && now < claims.expires_at
    }

    /// The `name` claim, but only while the token is valid.
    pub fn valid_user_name(&self) -> Option<String> {
        if self.is_valid() {
            Some(self.claims().name)
        } else {
            None
        }
    }
}

/// Tokens arrive base64url-encoded without padding, but some issuers emit
/// the standard alphabet with padding; accept either.
fn decode_segment(segment: &str) -> Option<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .ok()
        .or_else(|| STANDARD.decode(segment).ok())
}
