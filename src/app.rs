//! 应用入口 - 编排层之上
//!
//! 扫描输入目录 → 创建批次 → 开始处理 → 每秒输出进度 → 等待结束。
//! 收到 Ctrl+C 时请求取消，正在执行的分块会自然结束。
//!
//! 每个评分模型是一条独立轨道。轨道之间不共享阶段结果：抽取在每条轨道上各执行一次，
//! 校验阶段只看到本轨道的抽取和评分，即对单个模型的评分做复核，而不是跨模型比对。

use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Config;
use crate::models::{load_unit_inputs, BatchStatus, StageKind};
use crate::orchestrator::{BatchService, Pipeline, ProgressSnapshot, TrackDef};
use crate::services::{
    FileInputCleanup, FileResultSink, LlmStageProcessor, RemoteJobProcessor, StageProcessor,
};
use crate::utils::logging::log_inputs_loaded;

/// 应用主结构
pub struct App {
    config: Config,
    service: BatchService,
}

impl App {
    /// 初始化应用
    pub fn initialize(config: Config) -> Result<Self> {
        config.validate()?;

        log_startup(&config);

        let pipeline = build_pipeline(&config);
        let sink = Arc::new(FileResultSink::new(&config.output_folder));

        let mut service = BatchService::new(pipeline, sink, config.orchestrator())?
            .with_retention(config.retention_policy());
        if config.remove_inputs_after_processing {
            service = service.with_input_cleanup(Arc::new(FileInputCleanup));
        }

        Ok(Self { config, service })
    }

    /// 运行应用主逻辑
    pub async fn run(&self) -> Result<()> {
        // 加载所有待处理的文档
        info!("\n📁 正在扫描待处理的文档...");
        let inputs = load_unit_inputs(&self.config.input_folder).await?;

        if inputs.is_empty() {
            warn!("⚠️ 没有找到待处理的文档，程序结束");
            return Ok(());
        }
        log_inputs_loaded(inputs.len(), &self.config.input_folder);

        let batch_id = self.service.create_batch(inputs)?;
        self.service.start_batch(&batch_id)?;

        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        let status = loop {
            tokio::select! {
                status = self.service.wait_for_terminal(&batch_id) => break status?,
                _ = ticker.tick() => log_progress(&self.service.get_progress(&batch_id)?),
                _ = tokio::signal::ctrl_c() => {
                    warn!("⚠️ 收到中断信号，正在取消批次 {}...", batch_id);
                    self.service.cancel_batch(&batch_id).await?;
                }
            }
        };

        let snapshot = self.service.get_progress(&batch_id)?;
        if status == BatchStatus::Failed {
            bail!(
                "批次 {} 失败: {}",
                batch_id,
                snapshot.fatal_error.unwrap_or_default()
            );
        }

        Ok(())
    }
}

/// 每个评分模型一条轨道：抽取 → 评分 → 校验本模型的评分
///
/// 配置了远程抽取服务时使用轮询协议抽取，否则由模型抽取。
/// 抽取器和校验器实例在轨道间共享（只初始化一次），但每条轨道各自调用
fn build_pipeline(config: &Config) -> Pipeline {
    let extractor: Arc<dyn StageProcessor> = match &config.extraction_service_url {
        Some(url) => Arc::new(RemoteJobProcessor::new(
            url.as_str(),
            StageKind::Extract,
            config.poll_policy(),
        )),
        None => Arc::new(LlmStageProcessor::from_config(
            config,
            StageKind::Extract,
            &config.extraction_model,
        )),
    };
    let validator: Arc<dyn StageProcessor> = Arc::new(LlmStageProcessor::from_config(
        config,
        StageKind::Validate,
        &config.validation_model,
    ));

    config
        .scoring_models
        .iter()
        .fold(Pipeline::new(), |pipeline, model| {
            let scorer: Arc<dyn StageProcessor> = Arc::new(LlmStageProcessor::from_config(
                config,
                StageKind::Score,
                model,
            ));
            pipeline.track(
                TrackDef::new(model.clone())
                    .stage(StageKind::Extract.to_string(), extractor.clone())
                    .stage(StageKind::Score.to_string(), scorer)
                    .stage(StageKind::Validate.to_string(), validator.clone()),
            )
        })
}

// ========== 日志辅助函数 ==========

fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 文档批处理模式");
    info!("📊 每个阶段最大并发数: {}", config.stage_concurrency);
    info!("🤖 评分模型: {}", config.scoring_models.join(", "));
    info!("{}", "=".repeat(60));
}

fn log_progress(snapshot: &ProgressSnapshot) {
    let eta = snapshot
        .eta_secs
        .map(|secs| format!("{:.0} 秒", secs))
        .unwrap_or_else(|| "-".to_string());
    info!(
        "⏳ [{}] 成功 {} / 失败 {} / 取消 {} / 处理中 {} / 共 {} | 已用 {:.0} 秒，预计剩余 {}",
        snapshot.status,
        snapshot.succeeded(),
        snapshot.failed(),
        snapshot.cancelled(),
        snapshot.counts.in_progress_total(),
        snapshot.counts.total,
        snapshot.elapsed_secs,
        eta
    );
}
