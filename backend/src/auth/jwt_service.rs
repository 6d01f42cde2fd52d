use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const ADMIN_ROLE: &str = "admin";

/// JWT-related errors
#[derive(Debug, Error)]
pub enum JwtError {
    #[error("Token generation failed: {0}")]
    TokenGeneration(String),

    #[error("Token validation failed: {0}")]
    TokenValidation(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Missing role: {0}")]
    MissingRole(String),
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::TokenExpired,
            _ => JwtError::TokenValidation(err.to_string()),
        }
    }
}

/// JWT Claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // Operator id
    pub exp: i64,
    pub iat: i64,
    pub iss: String,
    pub roles: Vec<String>,
}

impl Claims {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret_key: String,
    pub issuer: String,
    pub token_expiry: Duration,
}

impl JwtConfig {
    pub fn new(secret_key: impl Into<String>, issuer: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            issuer: issuer.into(),
            token_expiry: Duration::hours(12),
        }
    }
}

/// HS256 tokens for the scoring operators
#[derive(Clone)]
pub struct JwtService {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret_key.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.secret_key.as_bytes());
        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    pub fn issue_token(&self, subject: &str, roles: &[&str]) -> Result<String, JwtError> {
        let now = Utc::now();
        let claims = Claims {
            sub: subject.to_string(),
            exp: (now + self.config.token_expiry).timestamp(),
            iat: now.timestamp(),
            iss: self.config.issuer.clone(),
            roles: roles.iter().map(|role| role.to_string()).collect(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| JwtError::TokenGeneration(e.to_string()))
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.config.issuer.as_str()]);

        let claims = decode::<Claims>(token, &self.decoding_key, &validation)?.claims;
        debug!(sub = %claims.sub, "Token validated");
        Ok(claims)
    }

    /// Validate and require the admin role
    pub fn authorize_admin(&self, token: &str) -> Result<Claims, JwtError> {
        let claims = self.validate_token(token)?;
        if !claims.has_role(ADMIN_ROLE) {
            return Err(JwtError::MissingRole(ADMIN_ROLE.to_string()));
        }
        Ok(claims)
    }
}
