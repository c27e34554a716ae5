pub mod api;
pub mod cache;
pub mod config;
pub mod decoder;
pub mod error;
pub mod poller;
pub mod registry;
pub mod retry;
pub mod rpc;
pub mod services;
