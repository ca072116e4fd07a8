//! 远程任务处理器 - 业务能力层
//!
//! 适用于"提交任务 → 轮询状态 → 获取结果"的多步协议（例如文档抽取服务）

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use crate::config::PollPolicy;
use crate::error::StageError;
use crate::models::{StageKind, StageOutput};
use crate::services::retry::{poll_until, PollStatus};
use crate::services::stage_processor::{StageInput, StageProcessor};

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    unit_id: &'a str,
    name: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct JobStatusResponse {
    status: String,
    #[serde(default)]
    error: Option<String>,
}

/// 远程任务处理器
///
/// - `POST {base}/jobs` 提交一次
/// - `GET {base}/jobs/{id}` 按固定间隔轮询，`failed` 立即失败，次数耗尽为超时
/// - `GET {base}/jobs/{id}/result` 获取结果并校验结构
pub struct RemoteJobProcessor {
    client: Client,
    name: String,
    base_url: String,
    kind: StageKind,
    poll: PollPolicy,
}

impl RemoteJobProcessor {
    pub fn new(base_url: impl Into<String>, kind: StageKind, poll: PollPolicy) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: Client::new(),
            name: format!("remote:{}:{}", kind, base_url),
            base_url,
            kind,
            poll,
        }
    }

    async fn submit(&self, input: &StageInput<'_>) -> Result<String, StageError> {
        let url = format!("{}/jobs", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&SubmitRequest {
                unit_id: &input.unit.id,
                name: &input.unit.name,
                content: input.document_text(),
            })
            .send()
            .await
            .map_err(|e| StageError::provider(&self.name, e))?;

        let response = self.check_status(response).await?;
        let submitted: SubmitResponse = response
            .json()
            .await
            .map_err(|e| StageError::MalformedResponse(format!("提交响应无法解析: {}", e)))?;

        debug!("[{}] 已提交远程任务: {}", input.unit.id, submitted.job_id);
        Ok(submitted.job_id)
    }

    async fn job_status(&self, job_id: &str) -> Result<PollStatus<()>, StageError> {
        let url = format!("{}/jobs/{}", self.base_url, job_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| StageError::provider(&self.name, e))?;

        let response = self.check_status(response).await?;
        let status: JobStatusResponse = response
            .json()
            .await
            .map_err(|e| StageError::MalformedResponse(format!("状态响应无法解析: {}", e)))?;

        Ok(match status.status.as_str() {
            "completed" | "succeeded" | "done" => PollStatus::Done(()),
            "failed" | "error" => PollStatus::Failed(
                status
                    .error
                    .unwrap_or_else(|| format!("任务 {} 处理失败", job_id)),
            ),
            _ => PollStatus::Pending,
        })
    }

    async fn fetch_result(&self, job_id: &str) -> Result<StageOutput, StageError> {
        let url = format!("{}/jobs/{}/result", self.base_url, job_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| StageError::provider(&self.name, e))?;

        let response = self.check_status(response).await?;
        let value: JsonValue = response
            .json()
            .await
            .map_err(|e| StageError::MalformedResponse(format!("结果无法解析: {}", e)))?;

        StageOutput::from_json(self.kind, value)
    }

    /// 认证失败意味着共享会话不可用，其余非 2xx 是普通的调用失败
    async fn check_status(&self, response: reqwest::Response) -> Result<reqwest::Response, StageError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(StageError::SessionUnavailable(format!(
                "{} 返回 {}: {}",
                self.name, status, body
            )));
        }
        Err(StageError::provider(
            &self.name,
            format!("HTTP {}: {}", status, body),
        ))
    }
}

#[async_trait]
impl StageProcessor for RemoteJobProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        self.kind
    }

    async fn prepare(&self) -> Result<(), StageError> {
        reqwest::Url::parse(&self.base_url).map_err(|e| {
            StageError::SessionUnavailable(format!("无效的服务地址 {}: {}", self.base_url, e))
        })?;
        Ok(())
    }

    async fn process(&self, input: StageInput<'_>) -> Result<StageOutput, StageError> {
        let job_id = self.submit(&input).await?;
        let label = format!("[{}] 远程任务 {}", input.unit.id, job_id);

        let job = job_id.as_str();
        poll_until(&self.poll, &label, |_| async move { self.job_status(job).await }).await?;

        info!("{} ✓ 已完成，正在获取结果", label);
        self.fetch_result(&job_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UnitInput;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_poll(max_attempts: usize) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(10),
            max_attempts,
        }
    }

    async fn run(processor: &RemoteJobProcessor) -> Result<StageOutput, StageError> {
        let unit = UnitInput::new("doc-1", "contract.pdf", "合同正文");
        let previous = BTreeMap::new();
        processor
            .process(StageInput {
                unit: &unit,
                track: "main",
                stage: "extract",
                previous: &previous,
            })
            .await
    }

    #[tokio::test]
    async fn test_submit_poll_and_fetch() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/jobs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "job_id": "j-1" })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/jobs/j-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "running" })))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/jobs/j-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "completed" })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/jobs/j-1/result"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "text": "合同正文", "pages": 4, "fields": {} })),
            )
            .mount(&server)
            .await;

        let processor = RemoteJobProcessor::new(server.uri(), StageKind::Extract, fast_poll(10));
        let output = run(&processor).await.unwrap();

        assert_eq!(output.as_extraction().unwrap().pages, Some(4));
    }

    #[tokio::test]
    async fn test_remote_failure_is_not_polled_again() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/jobs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "job_id": "j-2" })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/jobs/j-2"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "status": "failed", "error": "encrypted pdf" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let processor = RemoteJobProcessor::new(server.uri(), StageKind::Extract, fast_poll(10));
        let err = run(&processor).await.unwrap_err();

        assert!(matches!(err, StageError::RemoteFailed(ref m) if m == "encrypted pdf"));
    }

    #[tokio::test]
    async fn test_poll_budget_exhaustion_is_timeout() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/jobs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "job_id": "j-3" })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/jobs/j-3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "queued" })))
            .expect(3)
            .mount(&server)
            .await;

        let processor = RemoteJobProcessor::new(server.uri(), StageKind::Extract, fast_poll(3));
        let err = run(&processor).await.unwrap_err();

        assert!(matches!(err, StageError::Timeout { attempts: 3 }));
    }

    #[tokio::test]
    async fn test_malformed_result_is_rejected() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/jobs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "job_id": "j-4" })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/jobs/j-4"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "done" })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/jobs/j-4/result"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "pages": 1 })))
            .mount(&server)
            .await;

        let processor = RemoteJobProcessor::new(server.uri(), StageKind::Extract, fast_poll(3));
        assert!(matches!(
            run(&processor).await,
            Err(StageError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_unauthorized_submit_is_fatal() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/jobs"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
            .mount(&server)
            .await;

        let processor = RemoteJobProcessor::new(server.uri(), StageKind::Extract, fast_poll(3));
        let err = run(&processor).await.unwrap_err();
        assert!(err.is_fatal());
    }
}
