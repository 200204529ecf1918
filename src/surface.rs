use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info};

use crate::error::AppError;

/// The editable text region the feedback subsystem observes. Read-only to
/// every component except the orchestrator's final insertion of the
/// enhanced prompt.
pub trait EditableSurface: Send + Sync {
    fn read_text(&self) -> String;
    fn replace_text(&self, text: &str);
}

/// Finds the anchor editable element inside the host. A single probe may
/// fail while the host is still rendering; `locate_surface` retries it.
pub trait SurfaceLocator: Send + Sync {
    fn locate(&self) -> Option<Arc<dyn EditableSurface>>;
}

pub async fn locate_surface(
    locator: &dyn SurfaceLocator,
    attempts: u32,
    delay: Duration,
) -> Result<Arc<dyn EditableSurface>, AppError> {
    for attempt in 1..=attempts.max(1) {
        if let Some(surface) = locator.locate() {
            info!(attempt, "editable surface located");
            return Ok(surface);
        }
        debug!(attempt, "editable surface not present yet");
        if attempt < attempts {
            sleep(delay).await;
        }
    }
    Err(AppError::SurfaceNotFound { attempts })
}
