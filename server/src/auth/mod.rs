pub mod federated;
pub mod jwt;
pub mod middleware;
pub mod resolver;

use serde::{Deserialize, Serialize};

pub use resolver::{IdentityResolver, TokenVerifier};

/// Authenticated identity derived from a credential.
/// Produced once per connection and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub email: String,
}
