pub mod archive;
pub mod auth;
pub mod config;
pub mod error;
pub mod fsops;
pub mod paths;
pub mod server;
pub mod shares;
pub mod tokens;
pub mod undo;
