//! Note record use-cases.
//!
//! # Responsibility
//! - Validate and apply note record mutations (`note_service`).
//! - Derive the in-memory hierarchy index (`hierarchy`).
//! - Expose the async, shareable store facade (`note_store`).

pub mod hierarchy;
pub mod note_service;
pub mod note_store;
