//! LLM 阶段处理器 - 业务能力层
//!
//! 只负责"让模型完成一个阶段"的能力，不关心批次和流程
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 支持自定义 API 端点和模型
//! - 兼容 OpenAI API 的服务（如 Azure, Gemini, Doubao 等）

use anyhow::Result;
use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::config::{Config, RetryPolicy};
use crate::error::StageError;
use crate::models::{StageKind, StageOutput};
use crate::services::retry::retry_with_delay;
use crate::services::stage_processor::{StageInput, StageProcessor};
use crate::utils::logging::truncate_text;

/// 发送给模型的文档最大字符数
const MAX_DOCUMENT_CHARS: usize = 24_000;

/// LLM 阶段处理器
///
/// 职责：
/// - 按阶段类型构建提示词并调用模型
/// - 对瞬时错误按固定次数、固定间隔重试
/// - 校验响应结构，不合法的响应视为失败
pub struct LlmStageProcessor {
    client: Client<OpenAIConfig>,
    name: String,
    kind: StageKind,
    model_name: String,
    api_key_present: bool,
    retry: RetryPolicy,
}

impl LlmStageProcessor {
    /// 创建新的 LLM 阶段处理器
    pub fn new(
        kind: StageKind,
        model_name: impl Into<String>,
        api_key: &str,
        api_base: &str,
        retry: RetryPolicy,
    ) -> Self {
        // 配置 OpenAI 客户端（兼容 OpenAI API 的服务）
        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(api_base);

        let model_name = model_name.into();

        Self {
            client: Client::with_config(openai_config),
            name: format!("llm:{}:{}", kind, model_name),
            kind,
            model_name,
            api_key_present: !api_key.trim().is_empty(),
            retry,
        }
    }

    /// 使用程序配置创建
    pub fn from_config(config: &Config, kind: StageKind, model_name: &str) -> Self {
        Self::new(
            kind,
            model_name,
            &config.llm_api_key,
            &config.llm_api_base_url,
            config.retry_policy(),
        )
    }

    /// 通用的 LLM 调用函数
    ///
    /// # 参数
    /// - `user_message`: 用户消息内容
    /// - `system_message`: 系统消息（可选）
    ///
    /// # 返回
    /// 返回 LLM 的响应内容（字符串）
    pub async fn send_to_llm(&self, user_message: &str, system_message: Option<&str>) -> Result<String> {
        debug!("调用 LLM API，模型: {}", self.model_name);
        debug!("用户消息长度: {} 字符", user_message.len());

        let mut messages = Vec::new();

        if let Some(sys_msg) = system_message {
            let system_msg = ChatCompletionRequestSystemMessageArgs::default()
                .content(sys_msg)
                .build()?;
            messages.push(ChatCompletionRequestMessage::System(system_msg));
        }

        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(user_message)
            .build()?;
        messages.push(ChatCompletionRequestMessage::User(user_msg));

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(messages)
            .temperature(0.2)
            .max_tokens(2048u32)
            .build()?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            anyhow::anyhow!("LLM API 调用失败: {}", e)
        })?;

        debug!("LLM API 调用成功");

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| anyhow::anyhow!("LLM 返回内容为空"))?;

        Ok(content.trim().to_string())
    }

    /// 构建阶段提示词
    ///
    /// 返回 (user_message, system_message)
    fn build_messages(&self, input: &StageInput<'_>) -> (String, String) {
        let document = truncate_text(input.document_text(), MAX_DOCUMENT_CHARS);

        match self.kind {
            StageKind::Extract => (
                format!(
                    "文件名: {}\n\n文档内容:\n{}\n\n请抽取文档的完整正文，并识别标题、作者、日期等关键字段。\n\
                     只返回 JSON：{{\"text\": string, \"pages\": number|null, \"fields\": object}}",
                    input.unit.name, document
                ),
                "你是一个严谨的文档抽取助手，只输出合法 JSON，不输出任何解释。".to_string(),
            ),
            StageKind::Score => (
                format!(
                    "请按 0-100 分为以下文档打分，并给出各评分项的分值和理由。\n\n文档:\n{}\n\n\
                     只返回 JSON：{{\"score\": number, \"rationale\": string, \"criteria\": {{string: number}}}}",
                    document
                ),
                "你是一个公正的评审专家，评分必须在 0 到 100 之间，只输出合法 JSON。".to_string(),
            ),
            StageKind::Validate => {
                let previous = serde_json::to_string_pretty(input.previous).unwrap_or_default();
                (
                    format!(
                        "以下是同一文档在前序阶段得到的结果，请独立复核这些结果是否与文档一致。\n\n\
                         文档:\n{}\n\n前序结果:\n{}\n\n\
                         只返回 JSON：{{\"agreed\": boolean, \"confidence\": number(0-1), \"notes\": string}}",
                        document, previous
                    ),
                    "你是一个交叉校验助手，负责发现其他模型结果中的错误，只输出合法 JSON。"
                        .to_string(),
                )
            }
        }
    }
}

#[async_trait]
impl StageProcessor for LlmStageProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        self.kind
    }

    async fn prepare(&self) -> Result<(), StageError> {
        if !self.api_key_present {
            return Err(StageError::SessionUnavailable(format!(
                "{} 未配置 API Key",
                self.name
            )));
        }
        Ok(())
    }

    async fn process(&self, input: StageInput<'_>) -> Result<StageOutput, StageError> {
        let (user_message, system_message) = self.build_messages(&input);
        let label = format!("[{}] {} {}", input.track, input.stage, input.unit.id);
        let (user_message, system_message) = (user_message.as_str(), system_message.as_str());

        retry_with_delay(&self.retry, &label, |_| async move {
            let response = self
                .send_to_llm(user_message, Some(system_message))
                .await
                .map_err(|e| StageError::provider(&self.name, e))?;
            parse_stage_response(self.kind, &response)
        })
        .await
    }
}

/// 解析模型响应为经过校验的阶段结果
///
/// 模型经常把 JSON 包在 ```json 代码块里，这里先去掉代码块再解析
pub fn parse_stage_response(kind: StageKind, response: &str) -> Result<StageOutput, StageError> {
    let fence = Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```")
        .map_err(|e| StageError::MalformedResponse(e.to_string()))?;

    let body = fence
        .captures(response)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str())
        .unwrap_or(response)
        .trim();

    let value: JsonValue = serde_json::from_str(body).map_err(|e| {
        StageError::MalformedResponse(format!(
            "无法解析为 JSON ({}): {}",
            e,
            truncate_text(body, 120)
        ))
    })?;

    StageOutput::from_json(kind, value)
}
