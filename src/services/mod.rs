pub mod input_cleanup;
pub mod llm_service;
pub mod remote_job;
pub mod result_sink;
pub mod retry;
pub mod stage_processor;

pub use input_cleanup::{FileInputCleanup, InputCleanup, NoopInputCleanup};
pub use llm_service::LlmStageProcessor;
pub use remote_job::RemoteJobProcessor;
pub use result_sink::{FileResultSink, ResultSink, StageRecord};
pub use stage_processor::{StageInput, StageProcessor};
