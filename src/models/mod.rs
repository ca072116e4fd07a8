pub mod batch;
pub mod loaders;
pub mod stage_output;
pub mod unit;

pub use batch::{BatchId, BatchReport, BatchStatus, BatchSummary, UnitReport};
pub use loaders::load_unit_inputs;
pub use stage_output::{ExtractionResult, ScoreResult, StageKind, StageOutput, ValidationResult};
pub use unit::{Unit, UnitInput, UnitState};
