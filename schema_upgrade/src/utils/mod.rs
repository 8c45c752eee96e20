//! Utilities for SchemaUpgrade
//!
//! This module provides utility functions used across the library.

pub mod logging;
