pub mod collaborators;
pub mod config;
pub mod error;
pub mod metrics;
pub mod operators;
pub mod pipeline;
pub mod planner;
pub mod types;
