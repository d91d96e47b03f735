pub mod actions;
pub mod cli;
pub mod config;
pub mod core;
pub mod exit;
pub mod policy;
pub mod providers;
pub mod runner;
pub mod source;
pub mod ui;
