pub mod config;
pub mod daemon;
pub mod helpers;
pub mod init;
pub mod monitor;
pub mod policy;
pub mod session;
