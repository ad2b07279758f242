//! Rategate - Distributed Token Bucket Rate Limiting
//!
//! This crate caps the rate of outbound calls to a third-party API whose
//! quotas are shared by many uncoordinated processes. All coordination
//! between callers happens through a versioned shared state store, so any
//! number of limiter handles with the same name, in any number of
//! processes, enforce a single shared budget.

pub mod ratelimit;
pub mod store;
pub mod config;
pub mod error;
