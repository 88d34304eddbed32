pub mod blockscanner;
pub mod build_info;
pub mod cli;
pub mod config;
pub mod consumer;
pub mod logging;
pub mod pubkeys;
pub mod server;
pub mod state;
pub mod storage;
pub mod thorclient;
