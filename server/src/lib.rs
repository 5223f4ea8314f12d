//! Huddle room session and messaging coordinator.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod access;
pub mod auth;
pub mod chat;
pub mod config;
pub mod db;
pub mod error;
pub mod presence;
pub mod routes;
pub mod session;
pub mod signaling;
pub mod state;
pub mod ws;
