use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, AuthResult};

/// Application-focused representation of verified bearer-token claims.
#[derive(Debug, Clone, Serialize)]
pub struct Claims {
    pub subject: Option<String>,
    pub permissions: Vec<String>,
    pub expires_at: DateTime<Utc>,
    pub issued_at: Option<DateTime<Utc>>,
    pub issuer: String,
    pub audience: Vec<String>,
    /// Full claims mapping as decoded, so downstream consumers can read
    /// anything the token carried beyond the validated subset.
    pub raw: serde_json::Value,
}

impl Claims {
    /// Exact-match membership test; no wildcard or hierarchy semantics.
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|granted| granted == permission)
    }
}

#[derive(Debug, Deserialize)]
struct ClaimsRepr {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    permissions: Vec<String>,
    exp: i64,
    #[serde(default)]
    iat: Option<i64>,
    iss: String,
    #[serde(default)]
    aud: Option<AudienceRepr>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AudienceRepr {
    Single(String),
    Many(Vec<String>),
}

impl TryFrom<ClaimsRepr> for Claims {
    type Error = AuthError;

    fn try_from(value: ClaimsRepr) -> AuthResult<Self> {
        let expires_at = Utc
            .timestamp_opt(value.exp, 0)
            .single()
            .ok_or_else(|| AuthError::DecodeError(format!("'exp' out of range: {}", value.exp)))?;

        let issued_at = match value.iat {
            Some(iat) => Some(
                Utc.timestamp_opt(iat, 0)
                    .single()
                    .ok_or_else(|| AuthError::DecodeError(format!("'iat' out of range: {iat}")))?,
            ),
            None => None,
        };

        let audience = match value.aud {
            Some(AudienceRepr::Single(item)) => vec![item],
            Some(AudienceRepr::Many(items)) => items,
            None => Vec::new(),
        };

        Ok(Self {
            subject: value.sub,
            permissions: value.permissions,
            expires_at,
            issued_at,
            issuer: value.iss,
            audience,
            raw: serde_json::Value::Null,
        })
    }
}

impl TryFrom<serde_json::Value> for Claims {
    type Error = AuthError;

    fn try_from(value: serde_json::Value) -> AuthResult<Self> {
        let repr: ClaimsRepr = serde_json::from_value(value.clone())
            .map_err(|err| AuthError::DecodeError(err.to_string()))?;
        let mut claims = Claims::try_from(repr)?;
        claims.raw = value;
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_full_payload_and_keeps_raw() {
        let payload = json!({
            "sub": "auth0|5f3b",
            "permissions": ["get:drinks-detail", "post:drinks"],
            "exp": 1_900_000_000,
            "iat": 1_899_999_400,
            "iss": "https://tenant.example.com/",
            "aud": "drinks",
            "azp": "spa-client"
        });

        let claims = Claims::try_from(payload.clone()).expect("claims");
        assert_eq!(claims.subject.as_deref(), Some("auth0|5f3b"));
        assert!(claims.has_permission("post:drinks"));
        assert!(!claims.has_permission("delete:drinks"));
        assert_eq!(claims.issuer, "https://tenant.example.com/");
        assert_eq!(claims.audience, vec!["drinks".to_string()]);
        assert_eq!(claims.raw, payload);
    }

    #[test]
    fn audience_accepts_string_or_array() {
        let single = json!({"exp": 1_900_000_000, "iss": "i", "aud": "drinks"});
        let many = json!({"exp": 1_900_000_000, "iss": "i", "aud": ["drinks", "api"]});

        assert_eq!(
            Claims::try_from(single).unwrap().audience,
            vec!["drinks".to_string()]
        );
        assert_eq!(
            Claims::try_from(many).unwrap().audience,
            vec!["drinks".to_string(), "api".to_string()]
        );
    }

    #[test]
    fn absent_permissions_decode_to_empty_set() {
        let payload = json!({"exp": 1_900_000_000, "iss": "i", "aud": "drinks"});
        let claims = Claims::try_from(payload).expect("claims");
        assert!(claims.permissions.is_empty());
    }

    #[test]
    fn non_object_payload_is_a_decode_error() {
        let err = Claims::try_from(json!("not-a-claims-object")).expect_err("should fail");
        assert!(matches!(err, AuthError::DecodeError(_)));
    }
}
