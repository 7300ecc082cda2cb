//! Engine: the per-instrument decision pipeline and the loop that drives it.

pub mod accountant;
pub mod enricher;
pub mod executor;
pub mod pipeline;
pub mod scanner;
