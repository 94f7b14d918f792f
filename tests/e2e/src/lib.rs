//! Somnia E2E test support
//!
//! - `harness`: isolated, SQLite-backed memory systems in temp directories
//! - `mocks`: scriptable collaborators, device monitors and test data

pub mod harness;
