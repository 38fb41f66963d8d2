//! # Flagstream API Server Library
//!
//! HTTP gateway publishing feature-flag events to the configured pub/sub
//! backend.
//!
//! ## Modules
//!
//! - `app`: Application state and router builder
//! - `config`: Configuration management
//! - `error`: Error handling and HTTP response mapping
//! - `routes`: API route handlers

pub mod app;
pub mod config;
pub mod error;
pub mod routes;
