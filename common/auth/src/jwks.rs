use std::time::Duration;

use jsonwebtoken::DecodingKey;
use reqwest::Client;
use serde::Deserialize;
use tracing::warn;

use crate::error::{AuthError, AuthResult};

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Fetches the issuer's published key set from its discovery endpoint.
///
/// Any transport or document problem is a `KeyServiceUnavailable`: a retryable
/// external condition, not a statement about the token under verification.
#[derive(Clone)]
pub struct JwksFetcher {
    client: Client,
    url: String,
}

impl JwksFetcher {
    pub fn new(url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .expect("http client");
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn with_client(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn fetch(&self) -> AuthResult<Vec<(String, DecodingKey)>> {
        let response = self.client.get(&self.url).send().await.map_err(|err| {
            warn!(url = %self.url, error = %err, "failed to reach JWKS endpoint");
            AuthError::KeyServiceUnavailable(err.to_string())
        })?;

        if !response.status().is_success() {
            warn!(url = %self.url, status = %response.status(), "JWKS endpoint returned an error");
            return Err(AuthError::KeyServiceUnavailable(format!(
                "HTTP {} from {}",
                response.status(),
                self.url
            )));
        }

        let body: JwksResponse = response.json().await.map_err(|err| {
            warn!(url = %self.url, error = %err, "failed to parse JWKS response");
            AuthError::KeyServiceUnavailable(err.to_string())
        })?;

        let mut keys = Vec::new();
        for key in body.keys.into_iter() {
            let kid = key.kid.ok_or_else(|| {
                AuthError::KeyServiceUnavailable("JWKS entry missing kid".to_string())
            })?;
            let kty = key.kty.unwrap_or_else(|| "RSA".to_string());
            if kty != "RSA" {
                return Err(AuthError::KeyServiceUnavailable(format!(
                    "key '{kid}' uses unsupported key type '{kty}'"
                )));
            }

            let modulus = key.n.ok_or_else(|| {
                AuthError::KeyServiceUnavailable(format!("key '{kid}' missing RSA components"))
            })?;
            let exponent = key.e.ok_or_else(|| {
                AuthError::KeyServiceUnavailable(format!("key '{kid}' missing RSA components"))
            })?;

            let decoding_key =
                DecodingKey::from_rsa_components(&modulus, &exponent).map_err(|err| {
                    AuthError::KeyServiceUnavailable(format!("key '{kid}' failed to parse: {err}"))
                })?;
            keys.push((kid, decoding_key));
        }

        Ok(keys)
    }
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<JwkEntry>,
}

#[derive(Debug, Deserialize)]
struct JwkEntry {
    kid: Option<String>,
    kty: Option<String>,
    n: Option<String>,
    e: Option<String>,
}
