//! Strategy B: tokens minted by an external identity provider.
//!
//! Verification is offline: the provider's public keys are configured as PEM
//! files, and `iss`/`aud` must match the configured values.

use async_trait::async_trait;
use jsonwebtoken::errors::{Error as JwtError, ErrorKind};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::auth::resolver::TokenVerifier;
use crate::auth::Principal;
use crate::config::FederatedConfig;

#[derive(Debug, Deserialize)]
struct FederatedClaims {
    sub: String,
    #[serde(default)]
    email: String,
}

pub struct FederatedTokenVerifier {
    keys: Vec<DecodingKey>,
    validation: Validation,
}

impl FederatedTokenVerifier {
    /// Build a verifier from PEM-encoded public keys.
    pub fn from_pems(
        algorithm: Algorithm,
        issuer: &str,
        audience: &str,
        pems: &[Vec<u8>],
    ) -> Result<Self, JwtError> {
        let keys = pems
            .iter()
            .map(|pem| decoding_key(algorithm, pem))
            .collect::<Result<Vec<_>, _>>()?;

        let mut validation = Validation::new(algorithm);
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);

        Ok(Self { keys, validation })
    }

    /// Load the keys listed in the `[federated]` config section.
    pub fn from_config(config: &FederatedConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let algorithm: Algorithm = config.algorithm.parse()?;
        let mut pems = Vec::with_capacity(config.public_key_paths.len());
        for path in &config.public_key_paths {
            pems.push(std::fs::read(path)?);
        }
        if pems.is_empty() {
            return Err("federated identity enabled but no public_key_paths configured".into());
        }

        let verifier = Self::from_pems(algorithm, &config.issuer, &config.audience, &pems)?;
        tracing::info!(
            issuer = %config.issuer,
            keys = verifier.keys.len(),
            "Federated identity verifier loaded"
        );
        Ok(verifier)
    }
}

fn decoding_key(algorithm: Algorithm, pem: &[u8]) -> Result<DecodingKey, JwtError> {
    match algorithm {
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::PS256
        | Algorithm::PS384
        | Algorithm::PS512 => DecodingKey::from_rsa_pem(pem),
        Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(pem),
        Algorithm::EdDSA => DecodingKey::from_ed_pem(pem),
        // Symmetric algorithms would make the provider's secret a server secret
        _ => Err(ErrorKind::InvalidAlgorithm.into()),
    }
}

#[async_trait]
impl TokenVerifier for FederatedTokenVerifier {
    fn strategy(&self) -> &'static str {
        "federated"
    }

    async fn verify(&self, token: &str) -> Result<Principal, JwtError> {
        let mut last_err: JwtError = ErrorKind::InvalidToken.into();
        for key in &self.keys {
            match decode::<FederatedClaims>(token, key, &self.validation) {
                Ok(data) => {
                    return Ok(Principal {
                        id: data.claims.sub,
                        email: data.claims.email,
                    })
                }
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const PRIVATE_PEM: &str = include_str!("../../tests/fixtures/federated_ed25519_private.pem");
    const PUBLIC_PEM: &str = include_str!("../../tests/fixtures/federated_ed25519_public.pem");

    fn verifier() -> FederatedTokenVerifier {
        FederatedTokenVerifier::from_pems(
            Algorithm::EdDSA,
            "https://idp.example.com",
            "huddle",
            &[PUBLIC_PEM.as_bytes().to_vec()],
        )
        .unwrap()
    }

    fn sign(claims: serde_json::Value) -> String {
        let key = EncodingKey::from_ed_pem(PRIVATE_PEM.as_bytes()).unwrap();
        encode(&Header::new(Algorithm::EdDSA), &claims, &key).unwrap()
    }

    fn claims(iss: &str, aud: &str) -> serde_json::Value {
        json!({
            "sub": "fed-user",
            "email": "fed@example.com",
            "iss": iss,
            "aud": aud,
            "iat": Utc::now().timestamp(),
            "exp": Utc::now().timestamp() + 300,
        })
    }

    #[tokio::test]
    async fn test_valid_token() {
        let token = sign(claims("https://idp.example.com", "huddle"));
        let principal = verifier().verify(&token).await.unwrap();
        assert_eq!(principal.id, "fed-user");
        assert_eq!(principal.email, "fed@example.com");
    }

    #[tokio::test]
    async fn test_wrong_issuer_rejected() {
        let token = sign(claims("https://evil.example.com", "huddle"));
        assert!(verifier().verify(&token).await.is_err());
    }

    #[tokio::test]
    async fn test_wrong_audience_rejected() {
        let token = sign(claims("https://idp.example.com", "someone-else"));
        assert!(verifier().verify(&token).await.is_err());
    }

    #[tokio::test]
    async fn test_local_token_rejected() {
        let token = crate::auth::jwt::issue_local_token(&[5u8; 32], "u1", "", 60).unwrap();
        assert!(verifier().verify(&token).await.is_err());
    }

    #[test]
    fn test_symmetric_algorithm_refused() {
        let result = FederatedTokenVerifier::from_pems(
            Algorithm::HS256,
            "iss",
            "aud",
            &[b"secret".to_vec()],
        );
        assert!(result.is_err());
    }
}
