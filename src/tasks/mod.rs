// ============================================================================
// Background Tasks
// ============================================================================

pub mod timeout_sweeper;

pub use timeout_sweeper::{SweepReport, SweeperConfig, TimeoutSweeper};
