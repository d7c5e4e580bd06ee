// ABOUTME: Library module for changelog-transfer
// ABOUTME: Exports all core functionality for use in binary and tests

pub mod catalog;
pub mod changelog;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod migration;
pub mod utils;
