// Post Graph - users, posts and comments over a foreign-key-free document store

// Core types and primitives
pub mod core;

// Document store adapters, identity middleware
pub mod infrastructure;

// Reference graph model and read views
pub mod models;

// Consistency engine, read projection, integrity repair
pub mod services;

// HTTP surface
pub mod api;
pub mod app_state;

// Common utilities
pub mod config;
pub mod error;

// Re-exports for convenience
pub use error::{AppError, AppResult};
