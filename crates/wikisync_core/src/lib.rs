pub mod ai;
pub mod config;
pub mod error;
pub mod gitlab;
pub mod session;
