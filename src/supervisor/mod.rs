//! Supervisor module for driving a press and tracking its state.

mod progress;
mod runner;
mod state;
mod tasks;

pub use progress::*;
pub use runner::*;
pub use state::*;
pub use tasks::*;
