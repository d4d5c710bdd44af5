pub mod artifacts;
pub mod command;
pub mod config;
pub mod diff;
pub mod errors;
pub mod gates;
pub mod logging;
pub mod orchestrator;
pub mod review;
pub mod vcs;
