pub mod app;
pub mod blob;
pub mod cli;
pub mod client;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod rpc;
pub mod server;
pub mod service;
pub mod storage;
pub mod token;
