//! Windowgate - Fixed-Window Request Admission Control
//!
//! This crate decides, per inbound HTTP request, whether the caller has
//! exceeded its quota for the current fixed time window. Counters live in a
//! shared store (Redis, or an in-process map for single instances) so every
//! instance of a service sees the same counts. The limiter is exposed as a
//! tower layer that wraps any downstream service.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod store;
