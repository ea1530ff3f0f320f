//! Scholarship award allocation engine.
//!
//! Decides whether an applicant is eligible for a scholarship, drives each
//! application through its review lifecycle, and commits approvals against the
//! scholarship's finite award slots without ever over-allocating.

pub mod allocation;
pub mod config;
pub mod error;
pub mod telemetry;
