pub mod engine;
pub mod record;
pub mod selector;

pub use engine::{apply, apply_healed, retrievability, EngineError, SchedulerParams};
pub use record::{MemoryRecord, Outcome, RecordState};
pub use selector::select_due;
