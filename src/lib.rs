//! Local-first persistence for a personal finance tracker, with debounced
//! backup of every collection to the user's Google Drive app-data folder.

pub mod auth;
pub mod classify;
pub mod cli;
pub mod config;
pub mod drive;
pub mod error;
pub mod models;
pub mod notify;
pub mod snapshot;
pub mod store;
pub mod sync;
