//! Article harvester library.
//!
//! Searches an article portal by keyword, decodes the result links into
//! canonical article URLs, fetches and cleans each article and stores it
//! with a stable publication number. Campaigns can be run once or on a
//! schedule, and a JSON admin API exposes the controls.

// Allow raw string hashes for safety - they're harmless and prevent issues if content changes
#![allow(clippy::needless_raw_string_hashes)]

pub mod campaign;
pub mod config;
pub mod constants;
pub mod db;
pub mod fetcher;
pub mod http;
pub mod scheduler;
pub mod search;
pub mod service;
pub mod web;
