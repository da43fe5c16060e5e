//! # evalsys
//!
//! HTTP API, CLI and configuration for the Evalsys server. The binary in
//! `main.rs` is a thin wrapper; integration tests drive the router through
//! this library.

pub mod api;
pub mod cli;
pub mod config;
