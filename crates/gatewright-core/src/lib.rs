//! Gate resolution core: turns heterogeneous gate input into a deduplicated,
//! provenance-tracked gate list with an enforcement mode.

pub mod accumulator;
pub mod canonical;
pub mod enforcement;
pub mod engine;
pub mod error;
pub mod methodology;
pub mod normalize;
pub mod registry;
pub mod spec;
pub mod step_filter;
pub mod wire;
