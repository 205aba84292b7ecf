//! Worker process spawning, line reading and the pressy wire protocol.

mod lines;
mod process;
mod protocol;

pub use lines::*;
pub use process::*;
pub use protocol::*;
