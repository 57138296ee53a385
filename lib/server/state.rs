use std::sync::Arc;

use sqlx::{Pool, Sqlite};

use crate::{config::Config, management::KeyValidator};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Shared state cloned into every request handler.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub cfg: Arc<Config>,

    /// Metadata database pool.
    pub pool: Pool<Sqlite>,

    /// API key validation cache.
    pub keys: Arc<KeyValidator>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl AppState {
    /// Assembles the shared state.
    pub fn new(cfg: Config, pool: Pool<Sqlite>) -> Self {
        let keys = Arc::new(KeyValidator::new(&cfg, pool.clone()));
        Self {
            cfg: Arc::new(cfg),
            pool,
            keys,
        }
    }
}
