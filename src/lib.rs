//! Pressy Supervisor - drive the pressy worker through its line protocol.

pub mod config;
pub mod display;
pub mod pipeline;
pub mod supervisor;
pub mod worker;
