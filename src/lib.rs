//! maintd: a per-machine daemon that keeps registered git enlistments healthy
//! by running scheduled maintenance for every logged-on user.

pub mod client;
pub mod cmd;
pub mod config;
pub mod error;
pub mod git;
pub mod ipc;
pub mod maintenance;
pub mod paths;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod service;
pub mod session;
pub mod usock;
pub mod util;
pub mod verb;

pub use error::{Error, Result};
