/// 日志工具模块
///
/// 提供日志格式化和输出的辅助函数
use tracing::info;

use crate::models::BatchSummary;

/// 记录批次启动信息
///
/// # 参数
/// - `batch_id`: 批次ID
/// - `total_units`: 单元总数
/// - `tracks`: 轨道名称
/// - `chunk_size`: 分块大小
/// - `stage_concurrency`: 每个阶段的最大并发数
pub fn log_batch_start(
    batch_id: &str,
    total_units: usize,
    tracks: &[String],
    chunk_size: usize,
    stage_concurrency: usize,
) {
    info!("{}", "=".repeat(60));
    info!("🚀 批次启动: {}", batch_id);
    info!("📄 单元数: {} | 轨道: {}", total_units, tracks.join(", "));
    info!(
        "📋 每块 {} 个单元，每个阶段最大并发 {}",
        chunk_size, stage_concurrency
    );
    info!("💡 每块完成后再开始下一块");
    info!("{}", "=".repeat(60));
}

/// 记录输入加载信息
pub fn log_inputs_loaded(total: usize, folder: &str) {
    info!("✓ 在 {} 中找到 {} 个待处理的文档", folder, total);
}

/// 记录分块开始信息
///
/// # 参数
/// - `track`: 轨道名称
/// - `chunk_num`: 分块编号
/// - `total_chunks`: 分块总数
/// - `start`: 起始单元编号
/// - `end`: 结束单元编号
/// - `total`: 单元总数
pub fn log_chunk_start(
    track: &str,
    chunk_num: usize,
    total_chunks: usize,
    start: usize,
    end: usize,
    total: usize,
) {
    info!("\n{}", "=".repeat(60));
    info!("📦 [{}] 开始处理第 {}/{} 块", track, chunk_num, total_chunks);
    info!("📄 本块单元: {}-{} / 共 {} 个", start, end, total);
    info!("{}", "=".repeat(60));
}

/// 记录分块完成信息
pub fn log_chunk_complete(track: &str, chunk_num: usize, success: usize, total: usize) {
    info!("\n{}", "─".repeat(60));
    info!(
        "✓ [{}] 第 {} 块完成: 成功 {}/{}",
        track, chunk_num, success, total
    );
    info!("{}", "─".repeat(60));
}

/// 打印最终统计信息
///
/// # 参数
/// - `summary`: 批次汇总
/// - `elapsed_secs`: 处理耗时（秒）
/// - `output_location`: 结果输出位置
pub fn print_final_stats(summary: &BatchSummary, elapsed_secs: f64, output_location: Option<&str>) {
    info!("\n{}", "=".repeat(60));
    info!("📊 批次 {} 处理结束: {}", summary.id, summary.status);
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("耗时: {:.1} 秒", elapsed_secs);
    info!("{}", "=".repeat(60));
    info!("✅ 成功: {}/{}", summary.succeeded, summary.total_records);
    info!("❌ 失败: {}", summary.failed);
    info!("⏹️ 取消: {}", summary.cancelled);
    info!("{}", "=".repeat(60));
    if let Some(location) = output_location {
        info!("\n结果已保存至: {}", location);
    }
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
