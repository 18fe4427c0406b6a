pub mod config;
pub mod error;
pub mod mcp_server;
pub mod orchestrator;
pub mod prompt;
pub mod providers;
pub mod queue;
pub mod request;
pub mod router;
pub mod storage;
pub mod store;
pub mod telemetry;
pub mod tools;
pub mod types;
pub mod web;
pub mod worker;
