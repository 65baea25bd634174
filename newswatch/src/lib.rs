// Library interface for newswatch modules
// This allows tests and the helper binaries to import modules

pub mod app;
pub mod dates;
pub mod error;
pub mod events;
pub mod ingestion;
pub mod llm;
pub mod model;
pub mod notify;
pub mod orchestrator;
pub mod processing;
pub mod scraping;
pub mod server;
pub mod sources;
pub mod storage;
pub mod worker;
