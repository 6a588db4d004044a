pub mod agent;
pub mod api;
pub mod config;
pub mod error;
pub mod http;
pub mod runner;
pub mod stream;
pub mod util;
