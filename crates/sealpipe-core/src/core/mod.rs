pub mod control;
pub mod stage_runner;

pub use control::RunControl;
pub use stage_runner::{StageHandle, StageRunner, StageRuntimeSnapshot, WorkerRuntimeSnapshot};
