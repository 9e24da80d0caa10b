pub mod chat;
pub mod core;
pub mod digest;
pub mod index;
pub mod ingest;
pub mod jobs;
pub mod llm;
pub mod memory;
pub mod retrieval;
pub mod server;
pub mod state;
pub mod store;
