//! Conversation loop - provider rounds, tool execution and termination.

mod conversation_loop;

pub use conversation_loop::{ConversationLoop, LoopReport, LoopState, LoopTurn, MAX_ITERATIONS, Termination};
