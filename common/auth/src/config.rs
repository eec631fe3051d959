use jsonwebtoken::Algorithm;

/// Runtime configuration for bearer-token verification.
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// Issuer tenant domain, e.g. `dev-2m33ryh3.us.auth0.com`.
    pub domain: String,
    /// Expected audience claim (aud).
    pub audience: String,
    /// Signature algorithms the issuer is configured to use. The allow-list
    /// is ours; a token never gets to pick its own algorithm.
    pub algorithms: Vec<Algorithm>,
    /// Allowable clock skew in seconds when validating exp/nbf.
    pub leeway_seconds: u32,
}

impl JwtConfig {
    pub fn new(domain: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            audience: audience.into(),
            algorithms: vec![Algorithm::RS256],
            leeway_seconds: 0,
        }
    }

    pub fn with_algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.algorithms = algorithms;
        self
    }

    /// Adjust the allowed leeway. Zero means an expiry at or before now fails.
    pub fn with_leeway(mut self, seconds: u32) -> Self {
        self.leeway_seconds = seconds;
        self
    }

    /// Expected value of the `iss` claim.
    pub fn issuer(&self) -> String {
        format!("https://{}/", self.domain)
    }

    /// Well-known discovery endpoint publishing the issuer's signing keys.
    pub fn jwks_url(&self) -> String {
        format!("https://{}/.well-known/jwks.json", self.domain)
    }
}
