use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to initialize logging: {0}")]
    LoggingInit(String),
    #[error("editable surface not found after {attempts} attempts")]
    SurfaceNotFound { attempts: u32 },
    #[error("runtime error: {0}")]
    Runtime(String),
}
