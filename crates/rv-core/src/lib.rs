//! rv-core: Core abstractions and configuration for rovnc
//!
//! This crate provides the session and account types, the launcher
//! configuration, and the error taxonomy shared by the launcher library
//! and the command-line front end.

pub mod config;
pub mod error;
pub mod time;
pub mod types;

pub use error::RvError;
pub use types::{Account, Session};
