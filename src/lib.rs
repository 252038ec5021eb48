//! jobflow — job/task lifecycle tracking with a concurrent background runner.

pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod facade;
pub mod model;
pub mod runner;
pub mod store;
