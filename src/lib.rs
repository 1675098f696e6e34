pub mod aggregate;
pub mod cli;
pub mod config;
pub mod ingest;
pub mod source;
pub mod storage;
