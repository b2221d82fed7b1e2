//! Configuration loading.

pub mod settings;
