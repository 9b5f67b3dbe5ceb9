use std::path::PathBuf;
use std::sync::Arc;

use tracing::error;

use vault_db::{ChatError, Database};
use vault_gateway::{Fanout, GatewayConfig};

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub fanout: Fanout,
    pub gateway: GatewayConfig,
    pub pages: PageLimits,
    /// Where encrypted uploads are written
    pub file_dir: PathBuf,
}

#[derive(Debug, Clone, Copy)]
pub struct PageLimits {
    pub default: u32,
    pub max: u32,
}

impl PageLimits {
    /// Requested page size, defaulted and clamped to `1..=max`.
    pub fn clamp(&self, requested: Option<u32>) -> u32 {
        requested.unwrap_or(self.default).clamp(1, self.max)
    }
}

impl Default for PageLimits {
    fn default() -> Self {
        Self { default: 50, max: 200 }
    }
}

impl AppStateInner {
    /// Run a store call off the async runtime.
    pub async fn blocking<F, T>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&Database) -> Result<T, ChatError> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ApiError::internal_server_error("Internal server error")
            })?
            .map_err(ApiError::from)
    }
}
