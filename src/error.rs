use thiserror::Error;

/// Typed failures raised by the graphics core.
///
/// These travel inside `anyhow::Error` like every other failure in the crate;
/// use `downcast_ref::<GraphicsError>()` to match on them.
#[derive(Debug, Error)]
pub enum GraphicsError {
    #[error("missing validation layer: {0}")]
    MissingValidationLayer(String),
    #[error("missing instance extension: {0}")]
    MissingInstanceExtension(String),
    #[error("no suitable physical devices found")]
    NoSuitableDevice,
    #[error("insufficient swapchain support")]
    InadequateSwapchain,
    #[error("failed to compile shader `{name}`: {message}")]
    ShaderCompilation { name: String, message: String },
    #[error("unknown shader kind {0:?}")]
    UnknownShaderStage(shaderc::ShaderKind),
    #[error("device context is not initialized")]
    NotInitialized,
}
