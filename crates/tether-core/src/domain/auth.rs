//! AuthGate: admits or rejects a connection from its requested subprotocols.
//!
//! Peers authenticate by offering two WebSocket subprotocol tokens:
//!
//! ```text
//! Sec-WebSocket-Protocol: <role>,<secret>
//! ```
//!
//! where `<role>` is `device` or `client` and `<secret>` is the shared secret
//! configured on the relay.  The gate holds nothing but that secret; a failed
//! check tells the caller to close the transport with a policy-violation
//! status and never register the connection.

use std::fmt;
use std::str::FromStr;

use subtle::ConstantTimeEq;
use thiserror::Error;

/// The role a peer declares in its first subprotocol token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The single remote unit being bridged.
    Device,
    /// A viewer/controller of the device.
    Client,
}

impl Role {
    /// The token a peer sends to claim this role.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Device => "device",
            Role::Client => "client",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AuthError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        match token {
            "device" => Ok(Role::Device),
            "client" => Ok(Role::Client),
            _ => Err(AuthError::Unauthorized(Rejection::UnknownRole)),
        }
    }
}

/// Why a connection was refused.  Only used for logging; peers receive a
/// generic close reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Fewer than two subprotocol tokens were offered.
    MissingCredentials,
    /// The role token is neither `device` nor `client`.
    UnknownRole,
    /// The secret token does not match the configured secret.
    BadSecret,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Rejection::MissingCredentials => "missing role or secret",
            Rejection::UnknownRole => "unknown role",
            Rejection::BadSecret => "secret mismatch",
        })
    }
}

/// Errors returned by [`AuthGate::authenticate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Bad or missing credential.  The connection must be closed with
    /// [`CloseCode::POLICY_VIOLATION`](crate::CloseCode::POLICY_VIOLATION).
    #[error("unauthorized: {0}")]
    Unauthorized(Rejection),
}

impl AuthError {
    /// The plain-text close reason sent to the rejected peer.
    pub fn close_reason(&self) -> &'static str {
        "Unauthorized"
    }
}

/// Splits raw `Sec-WebSocket-Protocol` header values into ordered tokens.
///
/// Each value is split on `,` and every token is whitespace-trimmed.  Several
/// header lines are concatenated in the order given.  Empty tokens are kept
/// so a malformed list like `",secret"` cannot shift the secret into the
/// role position.
///
/// ```rust
/// use tether_core::domain::auth::parse_subprotocols;
///
/// assert_eq!(parse_subprotocols(&["client , s3cret"]), vec!["client", "s3cret"]);
/// assert!(parse_subprotocols::<&str>(&[]).is_empty());
/// ```
pub fn parse_subprotocols<S: AsRef<str>>(header_values: &[S]) -> Vec<String> {
    header_values
        .iter()
        .flat_map(|value| value.as_ref().split(','))
        .map(|token| token.trim().to_string())
        .collect()
}

/// Validates a peer's declared role and shared secret.
#[derive(Clone)]
pub struct AuthGate {
    secret: Vec<u8>,
}

impl AuthGate {
    /// Creates a gate that admits peers presenting `secret`.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into().into_bytes(),
        }
    }

    /// Authenticates an ordered token list (see [`parse_subprotocols`]).
    ///
    /// Succeeds when at least two tokens are present, token 0 names a known
    /// role, and token 1 equals the configured secret.  The secret comparison
    /// runs in constant time with respect to the matching prefix.
    pub fn authenticate<S: AsRef<str>>(&self, tokens: &[S]) -> Result<Role, AuthError> {
        let (role_token, secret_token) = match tokens {
            [role, secret, ..] => (role.as_ref(), secret.as_ref()),
            _ => return Err(AuthError::Unauthorized(Rejection::MissingCredentials)),
        };

        let secret_ok: bool = secret_token.as_bytes().ct_eq(self.secret.as_slice()).into();
        let role = role_token.parse::<Role>();

        if !secret_ok {
            return Err(AuthError::Unauthorized(Rejection::BadSecret));
        }
        role
    }
}

impl fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthGate")
            .field("secret", &"<redacted>")
            .finish()
    }
}
