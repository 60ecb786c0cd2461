//! chatloop - streaming multi-provider tool-calling conversation engine
//!
//! One inbound chat turn becomes a bounded loop of provider rounds. Each
//! round streams from one of three provider wire shapes, folds the frames
//! into text and tool calls, runs the tools the caller may use, and feeds the
//! results back until the model stops asking. The caller sees a single
//! normalized event stream whatever the provider.

pub mod access;
pub mod config;
pub mod error;
pub mod events;
pub mod llm;
pub mod prompt;
pub mod recorder;
pub mod runner;
pub mod server;
pub mod service;
pub mod tools;

pub use error::{ChatError, Result};
