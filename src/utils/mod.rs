//! Utils module - Utility functions and helpers

pub mod claim;
pub mod logging;
pub mod string;
