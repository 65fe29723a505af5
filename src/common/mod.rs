//! Scene and runtime configuration shared by the commands.

pub mod config;
pub mod scene;
