pub mod client;
pub mod config;
pub mod error;
pub mod history;
pub mod instrumentation;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod render;
pub mod server;
pub mod session;
