//! Integration test crate for the MOLT marketplace.
//!
//! This crate exists solely to run tests that span the market ledger and the
//! provider agent. It has no public API.

#![forbid(unsafe_code)]
