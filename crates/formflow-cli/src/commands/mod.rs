//! CLI Commands

pub mod config;
pub mod eval;
pub mod forms;
