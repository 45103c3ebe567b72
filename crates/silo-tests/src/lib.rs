//! # silo-tests
//!
//! Integration tests for the silo consensus engine.
//!
//! This crate provides:
//! - A chain harness (temp-dir database, block builders, permissive unlock
//!   verifier)
//! - Test data generators for transactions, contracts, and proofs
//! - Scenario tests for apply, maturity, reorgs, and quarantine
//! - Property-based tests for the reversibility invariants

pub mod generators;
pub mod harness;

#[cfg(test)]
mod scenario_tests;

#[cfg(test)]
mod contract_tests;


pub use generators::*;
pub use harness::*;
