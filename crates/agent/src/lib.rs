//! The oxpilot agent loop.
//!
//! `run_loop` is a pure streaming pipeline: given a snapshot of messages plus
//! a tool catalogue, it alternates model turns and tool phases until the model
//! stops calling tools, a turn limit is hit, cancellation fires, or an error
//! surfaces. Results flow back exclusively through the event stream — the loop
//! never aliases the caller's message list.

pub mod loop_runner;
pub mod react;
pub mod testing;

pub use loop_runner::{LoopConfig, run_loop};
pub use react::parse_react_tool_call;
