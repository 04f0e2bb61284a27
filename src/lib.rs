pub mod agent;
pub mod config;
pub mod server;
pub mod util;
pub mod workspace;
