//! rovnc: command-line front end for the remote observing launcher
//!
//! Parses arguments, sets up logging, prompts for credentials and drives
//! the interactive menu on top of `rv_launcher`.

pub mod logging;
pub mod menu;
pub mod output;
pub mod prompt;
