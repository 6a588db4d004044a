//! outpost-cli library: argument parsing and assembly, exposed for tests.

pub mod app;
pub mod commands;
