//! Bearer token claims.

use serde::{Deserialize, Serialize};

use super::AuthError;

/// Claim set carried by a bearer token.
///
/// Only `sub` and `exp` are interpreted; any other claim is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject. Required and non-empty for the token to be accepted.
    #[serde(default)]
    pub sub: String,

    /// Expiration time (Unix timestamp, seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    /// Issued at (Unix timestamp, seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}

impl Claims {
    /// Structural validity at instant `now` (epoch seconds).
    ///
    /// The subject must be non-empty and, when an expiry is present, `now`
    /// must be strictly before it.
    pub fn check(&self, now: i64) -> Result<(), AuthError> {
        if self.sub.trim().is_empty() {
            return Err(AuthError::InvalidToken("missing subject claim".to_string()));
        }

        if let Some(exp) = self.exp
            && now >= exp
        {
            return Err(AuthError::TokenExpired);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(sub: &str, exp: Option<i64>) -> Claims {
        Claims {
            sub: sub.to_string(),
            exp,
            iat: None,
        }
    }

    #[test]
    fn test_subject_required() {
        assert!(matches!(
            claims("", None).check(1_000),
            Err(AuthError::InvalidToken(_))
        ));
        assert!(claims("   ", Some(2_000)).check(1_000).is_err());
    }

    #[test]
    fn test_no_expiry_accepted() {
        assert!(claims("alice", None).check(i64::MAX).is_ok());
    }

    #[test]
    fn test_expiry_is_strict() {
        assert!(claims("alice", Some(1_001)).check(1_000).is_ok());
        assert!(matches!(
            claims("alice", Some(1_000)).check(1_000),
            Err(AuthError::TokenExpired)
        ));
        assert!(claims("alice", Some(999)).check(1_000).is_err());
    }

    #[test]
    fn test_deserialize_ignores_unknown_claims() {
        let parsed: Claims =
            serde_json::from_str(r#"{"sub":"bob","role":"admin","aud":["x"]}"#).unwrap();
        assert_eq!(parsed, claims("bob", None));

        let missing_sub: Claims = serde_json::from_str(r#"{"exp":42}"#).unwrap();
        assert!(missing_sub.sub.is_empty());
    }
}
