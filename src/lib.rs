pub mod api;
pub mod button;
pub mod config;
pub mod cues;
pub mod error;
pub mod metrics;
pub mod monitor;
pub mod network;
pub mod orchestrator;
pub mod quality;
pub mod session;
pub mod storage;
pub mod surface;
mod utils;

#[cfg(test)]
pub(crate) mod testing;

use tracing::{info, warn};

pub use api::{EnhanceRequest, EnhanceResponse, EnhancementApi, HttpEnhancementApi};
pub use button::{ButtonDriver, ButtonState, ButtonStateMachine, ButtonView};
pub use config::FeedbackConfig;
pub use cues::{CueController, CueKind};
pub use error::AppError;
pub use metrics::{FeedbackReport, RuntimeMetrics};
pub use monitor::{AnalysisRequest, ChangeNotice, ChangeSource, InputMonitor, MonitorEvent};
pub use network::{ConnectionManager, StreamEvent, StreamTransport, TungsteniteTransport};
pub use orchestrator::{EnhanceError, EnhanceOrchestrator, EnhanceOutcome};
pub use quality::{QualityIndicatorState, QualityLevel, QualityStateMachine, QualityView};
pub use session::{FeedbackRuntime, HostBindings, SessionContext};
pub use storage::{KeyringStore, MemoryStore, ProfileStore, StateStore};
pub use surface::{EditableSurface, SurfaceLocator};

pub fn init_logging() -> Result<(), AppError> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_env_filter("info")
        .try_init()
        .map_err(|err| AppError::LoggingInit(err.to_string()))
}

pub fn init_rustls_crypto_provider() {
    if rustls::crypto::CryptoProvider::get_default().is_some() {
        return;
    }

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls CryptoProvider was already installed");
    } else {
        info!("rustls CryptoProvider initialized with ring");
    }
}
