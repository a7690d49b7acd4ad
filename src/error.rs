use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Worker error: {0}")]
    Worker(#[from] crate::worker::ParseError),

    #[error("Registry error: {0}")]
    Registry(#[from] crate::worker::RegistryError),

    #[error("Model error: {0}")]
    Model(#[from] crate::model::ModelError),

    #[error("Provider error: {0}")]
    Provider(#[from] crate::provider::ProviderError),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] crate::sandbox::SandboxError),

    #[error("Tool error: {0}")]
    Tool(#[from] crate::tool::ToolError),

    #[error("Toolset error: {0}")]
    Toolset(#[from] crate::tool::ToolsetError),

    #[error("Approval error: {0}")]
    Approval(#[from] crate::tool::ApprovalError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] crate::runtime::RuntimeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
