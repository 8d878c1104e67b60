pub mod app;
pub mod auth;
pub mod client;
pub mod config;
pub mod context;
pub mod email;
pub mod error;
pub mod rpc;
pub mod state;
pub mod verification;
