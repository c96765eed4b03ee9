//! CLI command implementations for maintd.
//!
//! Each module corresponds to one subcommand. All of them except `serve` and
//! `maintenance` are thin clients of the running service.

pub mod list;
pub mod maintenance;
pub mod pause;
pub mod register;
pub mod serve;
pub mod status;
pub mod unmount;
pub mod unregister;
