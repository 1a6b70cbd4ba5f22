//! Shared type definitions
//!
//! This module contains the data types exchanged with the generation server
//! and persisted by the character store.

pub mod character;
pub mod generation;
pub mod message;
