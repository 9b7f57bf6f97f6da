//! Collaborative editing sessions for open notes.
//!
//! # Responsibility
//! - Name session slots (`key`) and describe the provider seam (`provider`).
//! - Keep one live session per document key (`registry`).
//! - Mirror bridged metadata between sessions and the store (`bridge`).

pub mod bridge;
pub mod key;
pub mod provider;
pub mod registry;
