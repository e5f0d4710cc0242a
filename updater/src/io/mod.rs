//! I/O adapters for the update engine.

pub mod config;
pub mod dependency_manager;
pub mod download;
pub mod filesystem;
pub mod process;
pub mod resolver;
pub mod signature;
pub mod state_store;
