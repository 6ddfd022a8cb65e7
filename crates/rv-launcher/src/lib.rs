//! rv-launcher: Session lifecycle management for rovnc
//!
//! The launcher discovers VNC sessions on a telescope server, opens SSH
//! tunnels to reach them, starts viewer and sound player processes on the
//! tunneled ports, and tears everything down exactly once at exit.

pub mod auth;
pub mod catalog;
pub mod layout;
pub mod lifecycle;
pub mod menu;
pub mod probe;
pub mod process;
pub mod registry;
pub mod remote;
pub mod sound;
pub mod state;
pub mod tunnel;
pub mod version;
pub mod viewer;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use lifecycle::{LifecycleController, MenuOutcome, Phase};
pub use state::{LaunchOptions, LauncherDeps, LauncherState};
