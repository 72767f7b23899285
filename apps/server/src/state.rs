use std::path::PathBuf;
use std::sync::Arc;

use chitter_shared::service::ChatService;

use crate::config::ServerConfig;

/// Shared application state passed to all handlers via Axum's State extractor.
///
/// `service` is the single storage-backend contract (`ChitterMem` or
/// `PostgresChitterDatabase`) behind a trait object so `router.rs`/`main.rs`
/// is the only place that knows which backend is live. `config` is Arc'd so
/// cloning `AppState` into every handler is cheap.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<dyn ChatService>,
    pub config: Arc<ServerConfig>,
    pub upload_dir: PathBuf,
}
