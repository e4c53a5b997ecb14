pub mod code_agent;
pub mod markers;
pub mod orchestrator;
pub mod prompts;
pub mod reviewer;
pub mod state_machine;
pub mod tracker;
pub mod workspace;
