//! Identity & token verification (C7).
//!
//! Classifies a caller as local (a user account on this homeserver) or
//! foreign (identified only by a `user@host` handle from federation), and
//! verifies the bearer token attached to a request. The concrete token
//! format and signing scheme belong to a transport-adjacent collaborator;
//! this module only defines the contract the request pipeline depends on.

use async_trait::async_trait;

use crate::errors::CoreResult;
use crate::ids::UserId;

/// The authenticated identity behind a request, once its token has been
/// verified.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Identity {
    Local(UserId),
    /// A user on another homeserver, named by their opaque foreign handle
    /// (`user_id@host`). Foreign callers can still mutate state they have
    /// permission over, but some RPCs are `local_only` and reject them
    /// outright before a handler ever runs.
    Foreign { handle: String, host: String },
}

impl Identity {
    pub fn is_local(&self) -> bool {
        matches!(self, Identity::Local(_))
    }

    pub fn local_user_id(&self) -> Option<UserId> {
        match self {
            Identity::Local(id) => Some(*id),
            Identity::Foreign { .. } => None,
        }
    }
}

/// Verifies a request's bearer token and resolves it to an `Identity`.
/// Implemented by a collaborator that owns the signing key material; the
/// core only consumes the trait.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> CoreResult<Identity>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_identity_exposes_its_user_id() {
        let id = Identity::Local(UserId::from_raw(42));
        assert!(id.is_local());
        assert_eq!(id.local_user_id(), Some(UserId::from_raw(42)));
    }

    #[test]
    fn foreign_identity_has_no_local_user_id() {
        let id = Identity::Foreign { handle: "alice@other.example".into(), host: "other.example".into() };
        assert!(!id.is_local());
        assert_eq!(id.local_user_id(), None);
    }
}
