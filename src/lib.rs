//! Reconciles a folder of bills against the GST submitted tree and tracks
//! which bills have been sent.

pub mod app;
pub mod config;
pub mod core;
pub mod utils;
