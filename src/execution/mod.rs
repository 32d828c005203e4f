//! Pipeline execution engine

pub mod cancel;
pub mod engine;
pub mod executor;
pub mod lock;
pub mod process;
pub mod scheduler;

pub use cancel::CancelHandle;
pub use engine::{EventHandler, PipelineRunner, RunEvent};
pub use executor::{StageExecution, StageExecutor};
pub use lock::{WorkspaceLock, LOCK_FILE_NAME};
pub use process::{ProcessOutput, ProcessRunner, SubprocessRunner};
pub use scheduler::{ExecutionScheduler, Footprint, SchedulingStrategy};
