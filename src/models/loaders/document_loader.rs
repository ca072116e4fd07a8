use crate::models::unit::UnitInput;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

/// 支持直接读取为文本的扩展名
const SUPPORTED_EXTENSIONS: &[&str] = &["txt", "md", "json"];

/// 从文件加载单个待处理单元
///
/// 单元 ID 使用文件名（不含扩展名），并记录文件路径以便处理完成后清理
pub async fn load_unit_input(path: &Path) -> Result<UnitInput> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("无法读取文件: {}", path.display()))?;

    let id = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| !s.trim().is_empty())
        .with_context(|| format!("无法从文件名生成单元 ID: {}", path.display()))?;

    let name = path
        .file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();

    Ok(UnitInput::new(id, name, content).with_path(path))
}

/// 从文件夹中加载所有待处理单元，按文件名排序
pub async fn load_unit_inputs(folder_path: &str) -> Result<Vec<UnitInput>> {
    let folder = PathBuf::from(folder_path);

    if !folder.exists() {
        anyhow::bail!("文件夹不存在: {}", folder_path);
    }

    let mut paths = Vec::new();
    let mut entries = fs::read_dir(&folder)
        .await
        .with_context(|| format!("无法读取文件夹: {}", folder_path))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let supported = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if supported {
            paths.push(path);
        }
    }
    paths.sort();

    let mut inputs = Vec::with_capacity(paths.len());
    for path in paths {
        tracing::info!(
            "正在加载: {}",
            path.file_name().unwrap_or_default().to_string_lossy()
        );

        match load_unit_input(&path).await {
            Ok(input) => inputs.push(input),
            Err(e) => {
                tracing::warn!("加载文件失败 {}: {}", path.display(), e);
            }
        }
    }

    Ok(inputs)
}
