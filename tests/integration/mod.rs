//! Integration tests for the tamer batch transformation system

mod batch_transform;
mod cli_commands;
mod config_integration;
