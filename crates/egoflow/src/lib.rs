pub mod backend;
pub mod build_info;
pub mod cleanup;
pub mod config;
pub mod connection;
pub mod exchange;
pub mod handlers;
pub mod server;
pub mod store;
pub mod sync;
pub mod tools;
