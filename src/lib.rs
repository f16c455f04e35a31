//! Translation management service: per-language key/value strings with tags,
//! filtered search, and cached flat or nested exports.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod extract;
pub mod generator;
pub mod languages;
pub mod query;
pub mod security;
pub mod server;
pub mod store;
pub mod tags;
