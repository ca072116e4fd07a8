//! 阶段结果模型
//!
//! 外部处理服务（LLM、远程抽取服务）返回的结构是不可信的，
//! 所有结果必须先按阶段类型反序列化并通过结构校验，才能被接受和持久化。

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::StageError;

/// 阶段类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// 文本抽取
    Extract,
    /// 评分
    Score,
    /// 交叉校验
    Validate,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageKind::Extract => "extract",
            StageKind::Score => "score",
            StageKind::Validate => "validate",
        };
        f.write_str(name)
    }
}

/// 抽取结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub text: String,
    #[serde(default)]
    pub pages: Option<u32>,
    #[serde(default)]
    pub fields: BTreeMap<String, JsonValue>,
}

/// 评分结果（0-100）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub score: f64,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub criteria: BTreeMap<String, f64>,
}

/// 交叉校验结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub agreed: bool,
    pub confidence: f64,
    #[serde(default)]
    pub notes: String,
}

/// 经过校验的阶段结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageOutput {
    Extraction(ExtractionResult),
    Score(ScoreResult),
    Validation(ValidationResult),
}

impl StageOutput {
    /// 按阶段类型解析并校验 JSON
    ///
    /// 结构不合法的响应一律视为失败，绝不当作成功结果返回
    pub fn from_json(kind: StageKind, value: JsonValue) -> Result<Self, StageError> {
        let output = match kind {
            StageKind::Extract => StageOutput::Extraction(
                serde_json::from_value(value).map_err(|e| malformed(kind, e))?,
            ),
            StageKind::Score => {
                StageOutput::Score(serde_json::from_value(value).map_err(|e| malformed(kind, e))?)
            }
            StageKind::Validate => StageOutput::Validation(
                serde_json::from_value(value).map_err(|e| malformed(kind, e))?,
            ),
        };

        output.validate().map_err(StageError::MalformedResponse)?;
        Ok(output)
    }

    /// 该结果对应的阶段类型
    pub fn kind(&self) -> StageKind {
        match self {
            StageOutput::Extraction(_) => StageKind::Extract,
            StageOutput::Score(_) => StageKind::Score,
            StageOutput::Validation(_) => StageKind::Validate,
        }
    }

    /// 结构校验
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StageOutput::Extraction(r) => {
                if r.text.trim().is_empty() {
                    return Err("抽取结果 text 为空".to_string());
                }
            }
            StageOutput::Score(r) => {
                if !(0.0..=100.0).contains(&r.score) {
                    return Err(format!("评分 {} 超出范围 [0, 100]", r.score));
                }
                if let Some((name, value)) =
                    r.criteria.iter().find(|(_, v)| !(0.0..=100.0).contains(*v))
                {
                    return Err(format!("评分项 {} 的分值 {} 超出范围 [0, 100]", name, value));
                }
            }
            StageOutput::Validation(r) => {
                if !(0.0..=1.0).contains(&r.confidence) {
                    return Err(format!("置信度 {} 超出范围 [0, 1]", r.confidence));
                }
            }
        }
        Ok(())
    }

    pub fn as_extraction(&self) -> Option<&ExtractionResult> {
        match self {
            StageOutput::Extraction(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_score(&self) -> Option<&ScoreResult> {
        match self {
            StageOutput::Score(r) => Some(r),
            _ => None,
        }
    }
}

fn malformed(kind: StageKind, err: serde_json::Error) -> StageError {
    StageError::MalformedResponse(format!("{} 结果结构不匹配: {}", kind, err))
}
