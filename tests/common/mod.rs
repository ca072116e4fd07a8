#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use doc_batch_orchestrator::config::{OrchestratorConfig, RetryPolicy};
use doc_batch_orchestrator::models::{
    BatchId, BatchReport, BatchStatus, ExtractionResult, ScoreResult, StageKind, StageOutput,
    UnitInput, ValidationResult,
};
use doc_batch_orchestrator::orchestrator::{BatchService, ProgressSnapshot};
use doc_batch_orchestrator::services::retry::retry_with_delay;
use doc_batch_orchestrator::{
    InputCleanup, ResultSink, SinkError, StageError, StageInput, StageProcessor, StageRecord,
};

/// 手动打开的闸门，用来把处理器卡在某个时刻
#[derive(Clone)]
pub struct Gate(Arc<watch::Sender<bool>>);

impl Gate {
    pub fn new() -> Self {
        Self(Arc::new(watch::channel(false).0))
    }

    pub fn open(&self) {
        self.0.send_replace(true);
    }

    fn receiver(&self) -> watch::Receiver<bool> {
        self.0.subscribe()
    }
}

/// 可编排行为的阶段处理器
pub struct FakeProcessor {
    name: String,
    kind: StageKind,
    failures: HashMap<String, StageError>,
    gates: HashMap<String, Gate>,
    delay: Duration,
    retry: Option<RetryPolicy>,
    prepare_error: Option<StageError>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    attempts: Mutex<HashMap<String, usize>>,
}

impl FakeProcessor {
    pub fn new(kind: StageKind) -> Self {
        Self {
            name: format!("fake:{}", kind),
            kind,
            failures: HashMap::new(),
            gates: HashMap::new(),
            delay: Duration::ZERO,
            retry: None,
            prepare_error: None,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            attempts: Mutex::new(HashMap::new()),
        }
    }

    pub fn fail_for(mut self, unit_id: &str, error: StageError) -> Self {
        self.failures.insert(unit_id.to_string(), error);
        self
    }

    pub fn gate_for<'a>(mut self, unit_ids: impl IntoIterator<Item = &'a str>, gate: &Gate) -> Self {
        for id in unit_ids {
            self.gates.insert(id.to_string(), gate.clone());
        }
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// 在处理器内部按策略重试
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn failing_prepare(mut self, error: StageError) -> Self {
        self.prepare_error = Some(error);
        self
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn attempts_for(&self, unit_id: &str) -> usize {
        self.attempts.lock().get(unit_id).copied().unwrap_or(0)
    }

    async fn attempt(&self, input: &StageInput<'_>) -> Result<StageOutput, StageError> {
        *self
            .attempts
            .lock()
            .entry(input.unit.id.clone())
            .or_default() += 1;

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        } else {
            tokio::task::yield_now().await;
        }

        if let Some(error) = self.failures.get(&input.unit.id) {
            return Err(error.clone());
        }

        Ok(match self.kind {
            StageKind::Extract => StageOutput::Extraction(ExtractionResult {
                text: input.unit.content.clone(),
                pages: Some(1),
                fields: Default::default(),
            }),
            StageKind::Score => StageOutput::Score(ScoreResult {
                score: 80.0,
                rationale: format!("{} scored", input.unit.id),
                criteria: Default::default(),
            }),
            StageKind::Validate => StageOutput::Validation(ValidationResult {
                agreed: true,
                confidence: 0.9,
                notes: String::new(),
            }),
        })
    }
}

#[async_trait]
impl StageProcessor for FakeProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        self.kind
    }

    async fn prepare(&self) -> Result<(), StageError> {
        match &self.prepare_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    async fn process(&self, input: StageInput<'_>) -> Result<StageOutput, StageError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = self.gates.get(&input.unit.id) {
            let mut rx = gate.receiver();
            let _ = rx.wait_for(|open| *open).await;
        }

        let result = match &self.retry {
            Some(policy) => {
                let label = format!("fake {}", input.unit.id);
                let input = &input;
                retry_with_delay(policy, &label, |_| async move { self.attempt(input).await })
                    .await
            }
            None => self.attempt(&input).await,
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// 记录所有写入的结果
#[derive(Default)]
pub struct RecordingSink {
    records: Mutex<Vec<(String, String, String)>>,
    summaries: Mutex<Vec<BatchReport>>,
    discarded: Mutex<Vec<BatchId>>,
}

impl RecordingSink {
    /// (unit, track, stage)
    pub fn records(&self) -> Vec<(String, String, String)> {
        self.records.lock().clone()
    }

    pub fn summaries(&self) -> Vec<BatchReport> {
        self.summaries.lock().clone()
    }

    pub fn discarded(&self) -> Vec<BatchId> {
        self.discarded.lock().clone()
    }
}

#[async_trait]
impl ResultSink for RecordingSink {
    fn location(&self, batch_id: &BatchId) -> Option<String> {
        Some(format!("memory://{}", batch_id))
    }

    async fn persist(&self, record: StageRecord<'_>) -> Result<(), SinkError> {
        self.records.lock().push((
            record.unit_id.to_string(),
            record.track.to_string(),
            record.stage.to_string(),
        ));
        Ok(())
    }

    async fn persist_summary(&self, report: &BatchReport) -> Result<(), SinkError> {
        self.summaries.lock().push(report.clone());
        Ok(())
    }

    async fn discard(&self, batch_id: &BatchId) -> Result<(), SinkError> {
        self.discarded.lock().push(batch_id.clone());
        Ok(())
    }
}

/// 记录被清理的输入
#[derive(Default)]
pub struct RecordingCleanup {
    cleaned: Mutex<Vec<String>>,
}

impl RecordingCleanup {
    pub fn cleaned(&self) -> Vec<String> {
        self.cleaned.lock().clone()
    }

    pub fn distinct(&self) -> HashSet<String> {
        self.cleaned.lock().iter().cloned().collect()
    }
}

#[async_trait]
impl InputCleanup for RecordingCleanup {
    async fn cleanup(&self, input: &UnitInput) -> Result<(), SinkError> {
        self.cleaned.lock().push(input.id.clone());
        Ok(())
    }
}

/// u1..un
pub fn inputs(n: usize) -> Vec<UnitInput> {
    (1..=n)
        .map(|i| UnitInput::new(format!("u{}", i), format!("doc-{}.txt", i), format!("文档 {} 正文", i)))
        .collect()
}

pub fn unit_ids(range: std::ops::RangeInclusive<usize>) -> Vec<String> {
    range.map(|i| format!("u{}", i)).collect()
}

pub fn config(chunk_size: usize, stage_concurrency: usize) -> OrchestratorConfig {
    OrchestratorConfig {
        chunk_size,
        stage_concurrency,
        activity_log_capacity: 20,
        verbose_logging: false,
    }
}

/// 轮询进度直到条件成立
pub async fn wait_until(
    service: &BatchService,
    id: &BatchId,
    mut condition: impl FnMut(&ProgressSnapshot) -> bool,
) -> ProgressSnapshot {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let snapshot = service.get_progress(id).expect("batch should exist");
        if condition(&snapshot) {
            return snapshot;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for condition, last counts: {:?}",
            snapshot.counts
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn wait_terminal(service: &BatchService, id: &BatchId) -> BatchStatus {
    tokio::time::timeout(Duration::from_secs(5), service.wait_for_terminal(id))
        .await
        .expect("batch did not finish in time")
        .expect("batch should exist")
}
