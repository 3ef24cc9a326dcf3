//! Session credentials threaded explicitly into every remote call.

use crate::{Timestamp, UserId, UserRole};
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};

/// Type-safe bearer token that prevents accidental logging.
#[derive(Clone)]
pub struct AccessToken(SecretString);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        let token: String = token.into();
        Self(SecretString::new(token.into()))
    }

    /// Expose the token value (only for building request headers).
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AccessToken([REDACTED])")
    }
}

/// The caller's authentication context.
///
/// Sessions are values: accessors read the credential from the session they
/// are handed on each call and never cache it.
#[derive(Debug, Clone)]
pub struct Session {
    user: Option<SessionUser>,
}

#[derive(Debug, Clone)]
struct SessionUser {
    user_id: UserId,
    role: UserRole,
    token: AccessToken,
    expires_at: Option<Timestamp>,
}

impl Session {
    /// A session with no signed-in user.
    pub fn anonymous() -> Self {
        Self { user: None }
    }

    /// A signed-in session.
    pub fn authenticated(user_id: UserId, role: UserRole, token: AccessToken) -> Self {
        Self {
            user: Some(SessionUser {
                user_id,
                role,
                token,
                expires_at: None,
            }),
        }
    }

    /// Set the instant after which the token is no longer accepted.
    pub fn with_expiry(mut self, expires_at: Timestamp) -> Self {
        if let Some(user) = self.user.as_mut() {
            user.expires_at = Some(expires_at);
        }
        self
    }

    /// True when a user is signed in with a non-empty, unexpired token.
    pub fn is_authenticated(&self) -> bool {
        match &self.user {
            Some(user) => {
                !user.token.is_empty()
                    && user.expires_at.map(|at| at > Utc::now()).unwrap_or(true)
            }
            None => false,
        }
    }

    /// The signed-in user, if the session is currently valid.
    pub fn user_id(&self) -> Option<&UserId> {
        if self.is_authenticated() {
            self.user.as_ref().map(|u| &u.user_id)
        } else {
            None
        }
    }

    pub fn role(&self) -> Option<UserRole> {
        if self.is_authenticated() {
            self.user.as_ref().map(|u| u.role)
        } else {
            None
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role().map(|r| r.is_admin()).unwrap_or(false)
    }

    pub fn access_token(&self) -> Option<&AccessToken> {
        if self.is_authenticated() {
            self.user.as_ref().map(|u| &u.token)
        } else {
            None
        }
    }

    /// True if the session may act on a record owned by `owner`.
    pub fn can_act_for(&self, owner: &UserId) -> bool {
        self.is_admin() || self.user_id() == Some(owner)
    }
}
