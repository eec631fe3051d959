use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde_json::Value;
use tracing::debug;

use crate::claims::Claims;
use crate::config::JwtConfig;
use crate::error::{AuthError, AuthResult};
use crate::jwks::JwksFetcher;

/// Thread-safe cache of decoding keys loaded from JWKS/PEM sources.
///
/// Reads and writes are short critical sections; the JWKS fetch itself never
/// runs under the lock, so a refresh does not stall unrelated verifications.
#[derive(Clone, Default)]
pub struct SigningKeyCache {
    inner: Arc<RwLock<HashMap<String, DecodingKey>>>,
}

impl SigningKeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_key(&self, kid: impl Into<String>, key: DecodingKey) {
        let mut guard = self.inner.write().expect("rwlock poisoned");
        guard.insert(kid.into(), key);
    }

    pub fn insert_rsa_pem(&self, kid: impl Into<String>, pem: &[u8]) -> AuthResult<()> {
        let kid = kid.into();
        let key = DecodingKey::from_rsa_pem(pem)
            .map_err(|err| AuthError::KeyServiceUnavailable(format!("bad PEM for '{kid}': {err}")))?;
        self.insert_key(kid, key);
        Ok(())
    }

    pub fn get(&self, kid: &str) -> Option<DecodingKey> {
        let guard = self.inner.read().expect("rwlock poisoned");
        guard.get(kid).cloned()
    }

    pub fn contains(&self, kid: &str) -> bool {
        let guard = self.inner.read().expect("rwlock poisoned");
        guard.contains_key(kid)
    }

    pub fn replace_all<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (String, DecodingKey)>,
    {
        let mut guard = self.inner.write().expect("rwlock poisoned");
        guard.clear();
        for (kid, key) in entries.into_iter() {
            guard.insert(kid, key);
        }
    }
}

#[derive(Clone)]
pub struct JwtVerifier {
    config: JwtConfig,
    cache: SigningKeyCache,
    jwks: Option<JwksFetcher>,
}

impl JwtVerifier {
    pub fn new(config: JwtConfig) -> Self {
        Self {
            config,
            cache: SigningKeyCache::new(),
            jwks: None,
        }
    }

    pub fn with_cache(config: JwtConfig, cache: SigningKeyCache) -> Self {
        Self {
            config,
            cache,
            jwks: None,
        }
    }

    pub fn builder(config: JwtConfig) -> JwtVerifierBuilder {
        JwtVerifierBuilder::new(config)
    }

    pub fn config(&self) -> &JwtConfig {
        &self.config
    }

    pub fn cache(&self) -> &SigningKeyCache {
        &self.cache
    }

    pub fn jwks_fetcher(&self) -> Option<&JwksFetcher> {
        self.jwks.as_ref()
    }

    /// Verify a raw credential and return its decoded claims.
    ///
    /// The header is parsed unverified only to learn the kid; the signature is
    /// then checked against the configured algorithm allow-list, and exp/iss/
    /// aud are required and validated.
    pub async fn verify(&self, token: &str) -> AuthResult<Claims> {
        let header =
            decode_header(token).map_err(|err| AuthError::MalformedHeader(err.to_string()))?;
        let kid = header
            .kid
            .ok_or_else(|| AuthError::MalformedHeader("no kid in token header".to_string()))?;
        let key = self.signing_key(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.algorithms = self.config.algorithms.clone();
        validation.set_issuer(&[self.config.issuer()]);
        validation.set_audience(&[self.config.audience.clone()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        validation.leeway = self.config.leeway_seconds.into();

        let token_data = decode::<Value>(token, &key, &validation)?;
        let claims = Claims::try_from(token_data.claims)?;
        debug!(kid, "verified bearer token");
        Ok(claims)
    }

    /// Resolve the decoding key for a kid, tolerating key rotation: a kid
    /// absent from the cache triggers exactly one fresh fetch before failing.
    async fn signing_key(&self, kid: &str) -> AuthResult<DecodingKey> {
        if let Some(key) = self.cache.get(kid) {
            return Ok(key);
        }

        self.refresh_jwks().await?;
        self.cache
            .get(kid)
            .ok_or_else(|| AuthError::UnknownSigningKey(kid.to_string()))
    }

    pub async fn refresh_jwks(&self) -> AuthResult<usize> {
        let fetcher = match &self.jwks {
            Some(fetcher) => fetcher,
            None => return Ok(0),
        };

        let keys = fetcher.fetch().await?;
        let count = keys.len();
        if count > 0 {
            self.cache.replace_all(keys);
        }
        Ok(count)
    }
}

pub struct JwtVerifierBuilder {
    config: JwtConfig,
    cache: SigningKeyCache,
    jwks: Option<JwksFetcher>,
}

impl JwtVerifierBuilder {
    fn new(config: JwtConfig) -> Self {
        Self {
            config,
            cache: SigningKeyCache::new(),
            jwks: None,
        }
    }

    pub fn with_cache(mut self, cache: SigningKeyCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_decoding_key(self, kid: impl Into<String>, key: DecodingKey) -> Self {
        self.cache.insert_key(kid, key);
        self
    }

    pub fn with_rsa_pem(self, kid: impl Into<String>, pem: &[u8]) -> AuthResult<Self> {
        self.cache.insert_rsa_pem(kid, pem)?;
        Ok(self)
    }

    /// Fetch keys from the issuer's well-known discovery endpoint derived
    /// from the configured domain.
    pub fn with_discovery(mut self) -> Self {
        self.jwks = Some(JwksFetcher::new(self.config.jwks_url()));
        self
    }

    pub fn with_jwks_url(mut self, url: impl Into<String>) -> Self {
        self.jwks = Some(JwksFetcher::new(url));
        self
    }

    pub fn with_jwks_fetcher(mut self, fetcher: JwksFetcher) -> Self {
        self.jwks = Some(fetcher);
        self
    }

    pub async fn build(self) -> AuthResult<JwtVerifier> {
        let verifier = JwtVerifier {
            config: self.config,
            cache: self.cache,
            jwks: self.jwks,
        };

        if verifier.jwks.is_some() {
            verifier.refresh_jwks().await?;
        }

        Ok(verifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use chrono::Utc;
    use httpmock::prelude::*;
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
    use rsa::pkcs1::{EncodeRsaPrivateKey, EncodeRsaPublicKey, LineEnding};
    use rsa::rand_core::OsRng;
    use rsa::traits::PublicKeyParts;
    use rsa::RsaPrivateKey;
    use serde::Serialize;
    use serde_json::json;

    const DOMAIN: &str = "tenant.example.com";
    const AUDIENCE: &str = "drinks";

    #[derive(Serialize)]
    struct TokenClaims<'a> {
        sub: &'a str,
        permissions: &'a [String],
        iss: &'a str,
        aud: &'a str,
        exp: i64,
        iat: i64,
    }

    struct KeyMaterial {
        encoding: EncodingKey,
        decoding: DecodingKey,
        modulus: String,
        exponent: String,
    }

    fn generate_key_material() -> KeyMaterial {
        let mut rng = OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, 2048).expect("key generation");
        let public_key = private_key.to_public_key();

        let private_pem = private_key
            .to_pkcs1_pem(LineEnding::LF)
            .expect("private pem");
        let public_pem = public_key.to_pkcs1_pem(LineEnding::LF).expect("public pem");

        let encoding = EncodingKey::from_rsa_pem(private_pem.as_bytes()).expect("encoding key");
        let decoding = DecodingKey::from_rsa_pem(public_pem.as_bytes()).expect("decoding key");
        let modulus = URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be());
        let exponent = URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be());

        KeyMaterial {
            encoding,
            decoding,
            modulus,
            exponent,
        }
    }

    fn issue_token(
        encoding: &EncodingKey,
        kid: &str,
        issuer: &str,
        audience: &str,
        permissions: &[String],
    ) -> String {
        let issued_at = Utc::now().timestamp();
        let claims = TokenClaims {
            sub: "auth0|barista",
            permissions,
            iss: issuer,
            aud: audience,
            exp: issued_at + 600,
            iat: issued_at,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid.to_string());
        encode(&header, &claims, encoding).expect("sign token")
    }

    fn issue_token_with_payload(encoding: &EncodingKey, kid: &str, payload: &serde_json::Value) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid.to_string());
        encode(&header, payload, encoding).expect("sign token")
    }

    fn test_verifier(material: &KeyMaterial, kid: &str) -> JwtVerifier {
        let cache = SigningKeyCache::new();
        cache.insert_key(kid, material.decoding.clone());
        JwtVerifier::with_cache(JwtConfig::new(DOMAIN, AUDIENCE), cache)
    }

    #[test]
    fn key_cache_insert_replace_round_trip() {
        let cache = SigningKeyCache::new();
        assert!(!cache.contains("kid"));
        cache.insert_key("kid", DecodingKey::from_secret(b"secret"));
        assert!(cache.contains("kid"));
        assert!(cache.get("kid").is_some());

        cache.replace_all(vec![(
            "another".to_string(),
            DecodingKey::from_secret(b"other"),
        )]);
        assert!(!cache.contains("kid"));
        assert!(cache.contains("another"));
    }

    #[tokio::test]
    async fn verifier_accepts_valid_token() {
        let material = generate_key_material();
        let kid = "test-key";
        let verifier = test_verifier(&material, kid);
        let permissions = vec!["post:drinks".to_string()];

        let token = issue_token(
            &material.encoding,
            kid,
            "https://tenant.example.com/",
            AUDIENCE,
            &permissions,
        );
        let claims = verifier.verify(&token).await.expect("verification succeeds");

        assert_eq!(claims.subject.as_deref(), Some("auth0|barista"));
        assert_eq!(claims.permissions, permissions);
        assert_eq!(claims.issuer, "https://tenant.example.com/");
        assert_eq!(claims.audience, vec![AUDIENCE.to_string()]);
    }

    #[tokio::test]
    async fn verifying_twice_yields_identical_claims() {
        let material = generate_key_material();
        let kid = "test-key";
        let verifier = test_verifier(&material, kid);
        let permissions = vec!["get:drinks-detail".to_string()];

        let token = issue_token(
            &material.encoding,
            kid,
            "https://tenant.example.com/",
            AUDIENCE,
            &permissions,
        );
        let first = verifier.verify(&token).await.expect("first pass");
        let second = verifier.verify(&token).await.expect("second pass");

        assert_eq!(first.raw, second.raw);
        assert_eq!(first.subject, second.subject);
        assert_eq!(first.permissions, second.permissions);
        assert_eq!(first.expires_at, second.expires_at);
    }

    #[tokio::test]
    async fn verifier_rejects_unknown_kid() {
        let material = generate_key_material();
        let kid = "missing";
        let verifier = JwtVerifier::new(JwtConfig::new(DOMAIN, AUDIENCE));

        let token = issue_token(
            &material.encoding,
            kid,
            "https://tenant.example.com/",
            AUDIENCE,
            &[],
        );
        let err = verifier
            .verify(&token)
            .await
            .expect_err("verification should fail");
        match err {
            AuthError::UnknownSigningKey(actual) => assert_eq!(actual, kid),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn verifier_rejects_token_without_kid() {
        let material = generate_key_material();
        let verifier = test_verifier(&material, "test-key");

        let header = Header::new(Algorithm::RS256);
        let claims = json!({
            "iss": "https://tenant.example.com/",
            "aud": AUDIENCE,
            "exp": Utc::now().timestamp() + 600,
        });
        let token = encode(&header, &claims, &material.encoding).expect("sign token");

        let err = verifier.verify(&token).await.expect_err("should fail");
        assert!(matches!(err, AuthError::MalformedHeader(_)));
    }

    #[tokio::test]
    async fn verifier_rejects_garbage_credential() {
        let verifier = JwtVerifier::new(JwtConfig::new(DOMAIN, AUDIENCE));
        let err = verifier
            .verify("not-a-jwt")
            .await
            .expect_err("should fail");
        assert!(matches!(err, AuthError::MalformedHeader(_)));
    }

    #[tokio::test]
    async fn verifier_rejects_expired_token() {
        let material = generate_key_material();
        let kid = "test-key";
        let verifier = test_verifier(&material, kid);

        let payload = json!({
            "iss": "https://tenant.example.com/",
            "aud": AUDIENCE,
            "exp": Utc::now().timestamp() - 120,
        });
        let token = issue_token_with_payload(&material.encoding, kid, &payload);

        let err = verifier.verify(&token).await.expect_err("should fail");
        assert!(matches!(err, AuthError::TokenExpired));
    }

    #[tokio::test]
    async fn verifier_rejects_wrong_issuer_even_with_valid_signature() {
        let material = generate_key_material();
        let kid = "test-key";
        let verifier = test_verifier(&material, kid);

        let token = issue_token(
            &material.encoding,
            kid,
            "https://evil.example.com/",
            AUDIENCE,
            &[],
        );
        let err = verifier.verify(&token).await.expect_err("should fail");
        assert!(matches!(err, AuthError::InvalidIssuer));
    }

    #[tokio::test]
    async fn verifier_rejects_wrong_audience() {
        let material = generate_key_material();
        let kid = "test-key";
        let verifier = test_verifier(&material, kid);

        let token = issue_token(
            &material.encoding,
            kid,
            "https://tenant.example.com/",
            "someone-else",
            &[],
        );
        let err = verifier.verify(&token).await.expect_err("should fail");
        assert!(matches!(err, AuthError::InvalidAudience));
    }

    #[tokio::test]
    async fn verifier_accepts_audience_list_containing_expected() {
        let material = generate_key_material();
        let kid = "test-key";
        let verifier = test_verifier(&material, kid);

        let payload = json!({
            "iss": "https://tenant.example.com/",
            "aud": [AUDIENCE, "management-api"],
            "exp": Utc::now().timestamp() + 600,
        });
        let token = issue_token_with_payload(&material.encoding, kid, &payload);

        let claims = verifier.verify(&token).await.expect("verification succeeds");
        assert_eq!(claims.audience.len(), 2);
    }

    #[tokio::test]
    async fn verifier_requires_exp_iss_aud() {
        let material = generate_key_material();
        let kid = "test-key";
        let verifier = test_verifier(&material, kid);

        let payload = json!({
            "iss": "https://tenant.example.com/",
            "exp": Utc::now().timestamp() + 600,
        });
        let token = issue_token_with_payload(&material.encoding, kid, &payload);

        let err = verifier.verify(&token).await.expect_err("should fail");
        match err {
            AuthError::MissingClaims(claim) => assert_eq!(claim, "aud"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn verifier_rejects_signature_from_other_key() {
        let signer = generate_key_material();
        let registered = generate_key_material();
        let kid = "test-key";
        let verifier = test_verifier(&registered, kid);

        let token = issue_token(
            &signer.encoding,
            kid,
            "https://tenant.example.com/",
            AUDIENCE,
            &[],
        );
        let err = verifier.verify(&token).await.expect_err("should fail");
        assert!(matches!(err, AuthError::InvalidSignature));
    }

    #[tokio::test]
    async fn unknown_kid_triggers_refetch_before_failing() {
        let material = generate_key_material();
        let server = MockServer::start();
        let kid = "rotated-key";
        let body = json!({
            "keys": [
                {
                    "kid": kid,
                    "kty": "RSA",
                    "n": material.modulus,
                    "e": material.exponent
                }
            ]
        });

        let mock = server.mock(|when, then| {
            when.method(GET).path("/.well-known/jwks.json");
            then.status(200)
                .header("content-type", "application/json")
                .body(body.to_string());
        });

        // Cache starts empty; the rotated kid is only discoverable by refetch.
        let verifier = JwtVerifier::builder(JwtConfig::new(DOMAIN, AUDIENCE))
            .with_jwks_url(format!("{}/.well-known/jwks.json", server.base_url()))
            .build()
            .await
            .expect("build");
        mock.assert_hits(1);

        let token = issue_token(
            &material.encoding,
            kid,
            "https://tenant.example.com/",
            AUDIENCE,
            &[],
        );
        verifier.verify(&token).await.expect("verification succeeds");

        let stranger = issue_token(
            &material.encoding,
            "never-published",
            "https://tenant.example.com/",
            AUDIENCE,
            &[],
        );
        let err = verifier.verify(&stranger).await.expect_err("should fail");
        assert!(matches!(err, AuthError::UnknownSigningKey(_)));
        // build + the single unknown-kid refetch each hit the endpoint once
        mock.assert_hits(2);
    }

    #[tokio::test]
    async fn unreachable_key_service_is_reported_as_such() {
        let material = generate_key_material();
        let server = MockServer::start();
        let _mock = server.mock(|when, then| {
            when.method(GET).path("/.well-known/jwks.json");
            then.status(503);
        });

        let verifier = JwtVerifier {
            config: JwtConfig::new(DOMAIN, AUDIENCE),
            cache: SigningKeyCache::new(),
            jwks: Some(JwksFetcher::new(format!(
                "{}/.well-known/jwks.json",
                server.base_url()
            ))),
        };

        let token = issue_token(
            &material.encoding,
            "any-kid",
            "https://tenant.example.com/",
            AUDIENCE,
            &[],
        );
        let err = verifier.verify(&token).await.expect_err("should fail");
        assert!(matches!(err, AuthError::KeyServiceUnavailable(_)));
    }

    #[tokio::test]
    async fn refresh_jwks_without_fetcher_returns_zero() {
        let verifier = JwtVerifier::new(JwtConfig::new(DOMAIN, AUDIENCE));
        let refreshed = verifier.refresh_jwks().await.expect("refresh succeeds");
        assert_eq!(refreshed, 0);
    }
}
