//! MAYA core library.
//! Knowledge probe, profile and history store, context assembly, inference bindings,
//! tool dispatch, and the turn orchestrator that ties them together.

pub mod config;
pub mod context;
pub mod error;
pub mod image;
pub mod inference;
pub mod knowledge_probe;
pub mod orchestrator;
pub mod store;
pub mod tools;
pub mod types;

pub use config::{LlmConfig, MayaConfig, ProbeConfig, SearchConfig, IDENTITY_KEY};
pub use context::{ContextAssembler, TurnContext};
pub use error::{ConfigError, InferenceError, StoreError, ToolError, TurnError, TurnStage};
pub use inference::{InferenceClient, OpenAiCompatClient};
pub use knowledge_probe::{parse_probe_output, ProcessProbe, Probe};
pub use orchestrator::TurnOrchestrator;
pub use store::{run_blocking, ConversationStore, Profile, SqliteStore};
pub use tools::{Tool, ToolDispatcher, ToolRegistry, ToolSpec, WebSearchTool};
pub use types::{
    AssistantMessage, ChatRequest, ChatResponse, KnowledgeResult, Message, Role, Step, StepIcon,
    ToolCall, Turn,
};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
