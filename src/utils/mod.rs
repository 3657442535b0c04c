// src/utils/mod.rs
//! Shared utilities: error types and configuration

pub mod config;
pub mod errors;
