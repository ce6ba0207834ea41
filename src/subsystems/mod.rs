//! Subsystem modules for the tool server.

pub mod comms;
pub mod runtime;
pub mod tools;
