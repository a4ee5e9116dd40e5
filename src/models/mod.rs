//! Core data model for the sync engine.
//!
//! These types describe the local and remote sides of a sync run and the
//! jobs that reconcile them. None of them outlive a single run.

pub mod checksum;
pub mod job;
pub mod policy;
pub mod remote;
