//! `amtctl`: command-line driver for AMT power control and KVM sessions.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod output;
pub mod terminal;
