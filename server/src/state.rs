use std::sync::Arc;

use crate::auth::federated::FederatedTokenVerifier;
use crate::auth::jwt::LocalTokenVerifier;
use crate::auth::{IdentityResolver, TokenVerifier};
use crate::config::Config;
use crate::db::{DbPool, RoomStore, SqliteStore};
use crate::session::RoomCoordinator;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Owns every session and the in-process presence state
    pub coordinator: Arc<RoomCoordinator>,
    /// SQLite store, also used for provisioning rooms and profiles
    pub store: SqliteStore,
}

impl AppState {
    pub fn new(coordinator: Arc<RoomCoordinator>, store: SqliteStore) -> Self {
        Self { coordinator, store }
    }

    /// Wire the identity strategies and the store into a coordinator.
    pub fn from_config(
        config: &Config,
        db: DbPool,
        jwt_secret: Vec<u8>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let local: Arc<dyn TokenVerifier> = Arc::new(LocalTokenVerifier::new(jwt_secret));
        let federated: Option<Arc<dyn TokenVerifier>> = match config.federated() {
            Some(federated) => Some(Arc::new(FederatedTokenVerifier::from_config(federated)?)),
            None => {
                tracing::info!("Federated identity disabled, accepting local tokens only");
                None
            }
        };
        let identity = Arc::new(IdentityResolver::with_fallback(local, federated));

        let store = SqliteStore::new(db);
        let room_store: Arc<dyn RoomStore> = Arc::new(store.clone());
        let coordinator = Arc::new(RoomCoordinator::new(identity, room_store));

        Ok(Self::new(coordinator, store))
    }
}
