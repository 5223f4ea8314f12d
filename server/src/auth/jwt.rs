use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::auth::resolver::TokenVerifier;
use crate::auth::Principal;

/// Claims carried by a locally signed token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalClaims {
    /// Opaque user id
    pub sub: String,
    #[serde(default)]
    pub email: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

/// Load or generate the local token signing key (256-bit random secret).
/// Key is stored as raw bytes in data_dir/jwt_secret.
pub fn load_or_generate_jwt_secret(data_dir: &str) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(data_dir)?;
    let key_path = Path::new(data_dir).join("jwt_secret");

    if key_path.exists() {
        let key = std::fs::read(&key_path)?;
        if key.len() == 32 {
            tracing::info!("JWT signing key loaded from {}", key_path.display());
            return Ok(key);
        }
        tracing::warn!("JWT key file has wrong size ({}), regenerating", key.len());
    }

    let key: [u8; 32] = rand::rng().random();
    std::fs::write(&key_path, key)?;
    tracing::info!("JWT signing key generated at {}", key_path.display());
    Ok(key.to_vec())
}

/// Issue a locally signed HS256 token valid for `ttl_secs`.
pub fn issue_local_token(
    secret: &[u8],
    user_id: &str,
    email: &str,
    ttl_secs: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp();
    let claims = LocalClaims {
        sub: user_id.to_string(),
        email: email.to_string(),
        iat: now,
        exp: now + ttl_secs,
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret))
}

/// Validate a locally signed token and return its claims.
pub fn validate_local_token(
    secret: &[u8],
    token: &str,
) -> Result<LocalClaims, jsonwebtoken::errors::Error> {
    let validation = Validation::new(Algorithm::HS256);
    let token_data = decode::<LocalClaims>(token, &DecodingKey::from_secret(secret), &validation)?;
    Ok(token_data.claims)
}

/// Strategy A: tokens signed with the server's own symmetric secret.
pub struct LocalTokenVerifier {
    secret: Vec<u8>,
}

impl LocalTokenVerifier {
    pub fn new(secret: Vec<u8>) -> Self {
        Self { secret }
    }
}

#[async_trait]
impl TokenVerifier for LocalTokenVerifier {
    fn strategy(&self) -> &'static str {
        "local"
    }

    async fn verify(&self, token: &str) -> Result<Principal, jsonwebtoken::errors::Error> {
        let claims = validate_local_token(&self.secret, token)?;
        Ok(Principal {
            id: claims.sub,
            email: claims.email,
        })
    }
}
