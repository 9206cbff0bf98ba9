//! Tool layer: clinic tool definitions and the executor the agent loop
//! drives. Every error becomes an informative Portuguese string for the
//! model; nothing here aborts a turn.

mod clinic;

pub use clinic::{clinic_tool_definitions, ClinicToolExecutor, ClinicTools};
pub use crate::llm::ToolDefinition;
