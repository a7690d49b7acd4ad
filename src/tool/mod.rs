pub mod approval;
pub mod executor;
pub mod registry;
pub mod schema;
pub mod toolsets;
pub mod types;

pub use approval::{
    ApprovalAnswer, ApprovalController, ApprovalDecision, ApprovalError, ApprovalMemory,
    ApprovalMode, ApprovalPrompt, ApprovalRequest, BusPrompt, RememberedDecision, fingerprint,
};
pub use executor::{ManualToolInfo, ToolExecution, ToolExecutor, ToolStatus};
pub use registry::{ToolsetBuildContext, ToolsetError, ToolsetFactory, ToolsetRegistry};
pub use types::{
    ManualExecution, ManualMode, Risk, Tool, ToolCall, ToolContext, ToolError, ToolResultValue,
    llm_visible,
};
