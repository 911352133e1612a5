//! Scene and run configuration shared by the binary and the tests.

pub mod config;
pub mod scene;
