use std::sync::Arc;

use async_trait::async_trait;

use crate::auth::Principal;
use crate::error::AuthError;

/// One way of turning a bearer credential into a principal.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Name used in server-side logs only.
    fn strategy(&self) -> &'static str;

    async fn verify(&self, token: &str) -> Result<Principal, jsonwebtoken::errors::Error>;
}

/// Resolves a connection credential into a `Principal`.
///
/// Strategies are tried in order, each exactly once. Callers only ever learn
/// `MissingCredential` or `InvalidCredential`; which strategy rejected the
/// token is logged and nothing more.
pub struct IdentityResolver {
    strategies: Vec<Arc<dyn TokenVerifier>>,
}

impl IdentityResolver {
    pub fn new(strategies: Vec<Arc<dyn TokenVerifier>>) -> Self {
        Self { strategies }
    }

    /// Local token first, federated token as fallback when configured.
    pub fn with_fallback(
        local: Arc<dyn TokenVerifier>,
        federated: Option<Arc<dyn TokenVerifier>>,
    ) -> Self {
        let mut strategies = vec![local];
        strategies.extend(federated);
        Self::new(strategies)
    }

    pub async fn authenticate(&self, credential: Option<&str>) -> Result<Principal, AuthError> {
        let token = credential
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingCredential)?;

        for strategy in &self.strategies {
            match strategy.verify(token).await {
                Ok(principal) => {
                    tracing::debug!(
                        user_id = %principal.id,
                        strategy = strategy.strategy(),
                        "Credential accepted"
                    );
                    return Ok(principal);
                }
                Err(e) => {
                    tracing::debug!(
                        strategy = strategy.strategy(),
                        error = %e,
                        "Credential rejected by strategy"
                    );
                }
            }
        }

        tracing::warn!("Credential rejected by all strategies");
        Err(AuthError::InvalidCredential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Accepts exactly one token and counts calls.
    struct FixedVerifier {
        accepts: &'static str,
        user: &'static str,
        calls: AtomicUsize,
    }

    impl FixedVerifier {
        fn new(accepts: &'static str, user: &'static str) -> Arc<Self> {
            Arc::new(Self {
                accepts,
                user,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TokenVerifier for FixedVerifier {
        fn strategy(&self) -> &'static str {
            "fixed"
        }

        async fn verify(&self, token: &str) -> Result<Principal, jsonwebtoken::errors::Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if token == self.accepts {
                Ok(Principal {
                    id: self.user.to_string(),
                    email: format!("{}@example.com", self.user),
                })
            } else {
                Err(jsonwebtoken::errors::ErrorKind::InvalidToken.into())
            }
        }
    }

    #[tokio::test]
    async fn test_missing_credential() {
        let only: Arc<dyn TokenVerifier> = FixedVerifier::new("a", "u1");
        let resolver = IdentityResolver::new(vec![only]);
        assert_eq!(
            resolver.authenticate(None).await,
            Err(AuthError::MissingCredential)
        );
        assert_eq!(
            resolver.authenticate(Some("   ")).await,
            Err(AuthError::MissingCredential)
        );
    }

    #[tokio::test]
    async fn test_local_wins_without_consulting_fallback() {
        let local = FixedVerifier::new("tok", "local-user");
        let federated = FixedVerifier::new("tok", "fed-user");
        let fallback: Arc<dyn TokenVerifier> = federated.clone();
        let resolver = IdentityResolver::with_fallback(local.clone(), Some(fallback));

        let principal = resolver.authenticate(Some("tok")).await.unwrap();
        assert_eq!(principal.id, "local-user");
        assert_eq!(federated.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fallback_to_federated() {
        let local = FixedVerifier::new("local-tok", "local-user");
        let federated = FixedVerifier::new("fed-tok", "fed-user");
        let fallback: Arc<dyn TokenVerifier> = federated.clone();
        let resolver = IdentityResolver::with_fallback(local.clone(), Some(fallback));

        let principal = resolver.authenticate(Some("fed-tok")).await.unwrap();
        assert_eq!(principal.id, "fed-user");
        assert_eq!(local.calls.load(Ordering::SeqCst), 1);
        assert_eq!(federated.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_each_strategy_tried_once_then_invalid() {
        let local = FixedVerifier::new("a", "u1");
        let federated = FixedVerifier::new("b", "u2");
        let fallback: Arc<dyn TokenVerifier> = federated.clone();
        let resolver = IdentityResolver::with_fallback(local.clone(), Some(fallback));

        assert_eq!(
            resolver.authenticate(Some("nope")).await,
            Err(AuthError::InvalidCredential)
        );
        assert_eq!(local.calls.load(Ordering::SeqCst), 1);
        assert_eq!(federated.calls.load(Ordering::SeqCst), 1);
    }
}
