//! The ARCANOS daemon runtime: device adapter seams, the local LLM
//! client, the ActionPlan executor, the heartbeat/command-poll scheduler,
//! and the orchestrator that ties conversation routing, governance, and
//! the backend client together.

pub mod adapters;
pub mod llm_local;
pub mod orchestrator;
pub mod plan;
pub mod prompt;
pub mod scheduler;

pub use adapters::{
    Adapters, AdapterError, AudioAdapter, OperatorConsole, TerminalAdapter, TerminalOutput,
    VisionAdapter,
};
pub use llm_local::{LlmError, LlmResponse, LocalLlm, StreamEvent};
pub use orchestrator::{Orchestrator, TurnError, TurnOptions};
