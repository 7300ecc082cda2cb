//! Integration tests: the pipeline and scheduler wired to deterministic
//! mock collaborators.

mod mock_collaborators;
mod pipeline_flow;
mod scheduler_flow;
mod simulation;
