//! Sync engine services: gateways onto the outside world, and the planner,
//! decision engine and scheduler that drive them.

pub mod cdn;
pub mod decision;
pub mod executor;
pub mod object_store;
pub mod planner;
pub mod scheduler;
