//! Command handlers

pub mod config;
pub mod reset;
pub mod run;
pub mod status;
