//! LLM调用边界
//!
//! 定义翻译引擎所依赖的 [`LlmClient`] trait，以及基于OpenAI兼容Chat Completions接口的实现。
//! 引擎只关心"输入文本与指令 → 译文与token用量"，以及失败是否值得重试。
//!
//! # Example
//!
//! ```ignore
//! use doc_translation_agent::llm::{CompletionRequest, LlmClient, OpenAiClient};
//!
//! let client = OpenAiClient::new(config.llm.clone())?;
//! let request = CompletionRequest::new(0, "Hello", "中文");
//! let completion = client.complete(&request).await?;
//! println!("{} ({:?})", completion.text, completion.usage);
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::ops::AddAssign;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::agent_error;
use crate::api_constants::prompts;
use crate::config::LlmConfig;
use crate::error::Result;
use crate::tokenizer::estimate_tokens;

/// 术语表：源术语 → 固定译文，按键排序以保证提示词稳定
pub type Terminology = BTreeMap<String, String>;

/// token用量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, other: Self) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// 单个分块的翻译请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    /// 分块在原文中的位置
    pub chunk_index: usize,
    /// 待翻译的原文
    pub text: String,
    /// 目标语言
    pub target_language: String,
    /// 术语表
    pub terminology: Terminology,
    /// 同组内前序分块的原文，按原文顺序排列
    pub prior_context: Vec<String>,
}

impl CompletionRequest {
    pub fn new(chunk_index: usize, text: impl Into<String>, target_language: impl Into<String>) -> Self {
        Self {
            chunk_index,
            text: text.into(),
            target_language: target_language.into(),
            terminology: Terminology::new(),
            prior_context: Vec::new(),
        }
    }

    pub fn with_terminology(mut self, terminology: Terminology) -> Self {
        self.terminology = terminology;
        self
    }

    pub fn with_prior_context(mut self, prior_context: Vec<String>) -> Self {
        self.prior_context = prior_context;
        self
    }

    /// 渲染术语提示
    pub fn terminology_hints(&self) -> String {
        render_terminology(&self.terminology)
    }

    /// 渲染系统提示词：翻译规范 + 术语表 + 前文上下文
    pub fn system_prompt(&self) -> String {
        let mut prompt = prompts::TRANSLATION_SYSTEM_PROMPT
            .replace("{target_language}", &self.target_language)
            .replace("{terminology_info}", &self.terminology_hints());

        if !self.prior_context.is_empty() {
            prompt.push('\n');
            prompt.push_str(prompts::CONTEXT_HEADER);
            prompt.push_str("\n\"\"\"\n");
            prompt.push_str(&self.prior_context.join(""));
            prompt.push_str("\n\"\"\"\n");
        }

        prompt
    }
}

/// 渲染术语表为提示文本，空术语表返回空串
pub fn render_terminology(terminology: &Terminology) -> String {
    if terminology.is_empty() {
        return String::new();
    }

    let lines: Vec<String> = terminology
        .iter()
        .map(|(term, translation)| format!("- {}: {}", term, translation))
        .collect();

    format!("{}\n{}\n", prompts::TERMINOLOGY_HEADER, lines.join("\n"))
}

/// 单次调用的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
}

/// LLM调用错误
///
/// `Transient` 会被引擎按退避策略重试，`Permanent` 立即失败。
/// 失败的调用如果已经消耗了token（例如返回了空内容），`usage` 会携带这部分用量。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    Transient {
        message: String,
        usage: Option<TokenUsage>,
    },
    Permanent {
        message: String,
        usage: Option<TokenUsage>,
    },
}

impl LlmError {
    pub fn transient(message: impl Into<String>) -> Self {
        LlmError::Transient {
            message: message.into(),
            usage: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        LlmError::Permanent {
            message: message.into(),
            usage: None,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, LlmError::Transient { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            LlmError::Transient { message, .. } | LlmError::Permanent { message, .. } => message,
        }
    }

    pub fn usage(&self) -> Option<TokenUsage> {
        match self {
            LlmError::Transient { usage, .. } | LlmError::Permanent { usage, .. } => *usage,
        }
    }
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::Transient { message, .. } => write!(f, "暂时性错误: {}", message),
            LlmError::Permanent { message, .. } => write!(f, "永久性错误: {}", message),
        }
    }
}

impl std::error::Error for LlmError {}

impl From<reqwest::Error> for LlmError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_builder() {
            LlmError::permanent(format!("请求构建失败: {}", error))
        } else {
            LlmError::transient(format!("网络请求失败: {}", error))
        }
    }
}

/// LLM能力抽象
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 翻译单个分块
    async fn complete(&self, request: &CompletionRequest) -> std::result::Result<Completion, LlmError>;

    /// 提供方名称，用于日志
    fn provider_name(&self) -> &str;
}

/// OpenAI兼容Chat Completions客户端
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    config: LlmConfig,
    endpoint: String,
}

impl OpenAiClient {
    /// 创建客户端
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| agent_error!(config, "llm", format!("创建HTTP客户端失败: {}", e)))?;

        let endpoint = format!("{}/chat/completions", config.api_base.trim_end_matches('/'));

        Ok(Self {
            client,
            config,
            endpoint,
        })
    }

    fn request_body(&self, request: &CompletionRequest) -> Value {
        json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "messages": [
                { "role": "system", "content": request.system_prompt() },
                { "role": "user", "content": request.text },
            ],
            "chat_template_kwargs": { "enable_thinking": false },
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> std::result::Result<Completion, LlmError> {
        let body = self.request_body(request);

        let mut builder = self.client.post(&self.endpoint).json(&body);
        if !self.config.api_key.is_empty() {
            builder = builder.bearer_auth(&self.config.api_key);
        }

        let response = builder.send().await?;
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let message = format!("API返回错误状态 ({}): {}", status, error_text);
            return Err(if is_retryable_status(status) {
                LlmError::transient(message)
            } else {
                LlmError::permanent(message)
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| LlmError::transient(format!("解析API响应失败: {}", e)))?;

        parse_completion(&payload, request)
    }

    fn provider_name(&self) -> &str {
        &self.config.model
    }
}

/// 429与5xx值得重试，其余4xx视为请求本身有误
fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

/// 去掉推理模型输出的 `<think>...</think>` 段落
fn strip_reasoning(content: &str) -> String {
    static THINK_BLOCK: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = THINK_BLOCK.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>").ok());

    match pattern {
        Some(re) => re.replace_all(content, "").trim().to_string(),
        None => content.trim().to_string(),
    }
}

/// 从Chat Completions响应中提取译文与用量，上游未返回用量时按估算补齐
fn parse_completion(
    payload: &Value,
    request: &CompletionRequest,
) -> std::result::Result<Completion, LlmError> {
    let text = payload["choices"][0]["message"]["content"]
        .as_str()
        .map(strip_reasoning)
        .unwrap_or_default();

    let input_tokens = payload["usage"]["prompt_tokens"]
        .as_u64()
        .unwrap_or_else(|| (estimate_tokens(&request.system_prompt()) + estimate_tokens(&request.text)) as u64);
    let output_tokens = payload["usage"]["completion_tokens"]
        .as_u64()
        .unwrap_or_else(|| estimate_tokens(&text) as u64);
    let usage = TokenUsage::new(input_tokens, output_tokens);

    if text.is_empty() {
        return Err(LlmError::Transient {
            message: "API返回了空的翻译内容".to_string(),
            usage: Some(usage),
        });
    }

    debug!(
        "分块 #{} 调用完成: 输入 {} tokens, 输出 {} tokens",
        request.chunk_index, usage.input_tokens, usage.output_tokens
    );

    Ok(Completion { text, usage })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terminology() -> Terminology {
        let mut terms = Terminology::new();
        terms.insert("Hello".to_string(), "你好".to_string());
        terms.insert("API".to_string(), "接口".to_string());
        terms
    }

    #[test]
    fn test_render_terminology() {
        assert_eq!(render_terminology(&Terminology::new()), "");

        let rendered = render_terminology(&terminology());
        assert!(rendered.starts_with(prompts::TERMINOLOGY_HEADER));
        // BTreeMap 按键排序
        assert!(rendered.contains("- API: 接口\n- Hello: 你好"));
    }

    #[test]
    fn test_system_prompt_contains_language_terms_and_context() {
        let request = CompletionRequest::new(1, "World.", "Chinese")
            .with_terminology(terminology())
            .with_prior_context(vec!["Hello. ".to_string()]);
        let prompt = request.system_prompt();

        assert!(prompt.contains("into Chinese"));
        assert!(prompt.contains("- Hello: 你好"));
        assert!(prompt.contains(prompts::CONTEXT_HEADER));
        assert!(prompt.contains("Hello. "));
        assert!(!prompt.contains("{target_language}"));
    }

    #[test]
    fn test_system_prompt_without_context() {
        let prompt = CompletionRequest::new(0, "x", "English").system_prompt();
        assert!(!prompt.contains(prompts::CONTEXT_HEADER));
    }

    #[test]
    fn test_parse_completion_with_usage() {
        let payload = json!({
            "choices": [{ "message": { "content": "  你好，世界。 " } }],
            "usage": { "prompt_tokens": 120, "completion_tokens": 8 }
        });
        let request = CompletionRequest::new(0, "Hello, world.", "中文");
        let completion = parse_completion(&payload, &request).unwrap();
        assert_eq!(completion.text, "你好，世界。");
        assert_eq!(completion.usage, TokenUsage::new(120, 8));
    }

    #[test]
    fn test_parse_completion_estimates_missing_usage() {
        let payload = json!({ "choices": [{ "message": { "content": "Bonjour" } }] });
        let request = CompletionRequest::new(0, "Hello", "French");
        let completion = parse_completion(&payload, &request).unwrap();
        assert!(completion.usage.input_tokens > 0);
        assert_eq!(completion.usage.output_tokens, 2);
    }

    #[test]
    fn test_parse_completion_empty_content_is_transient_with_usage() {
        let payload = json!({
            "choices": [{ "message": { "content": "" } }],
            "usage": { "prompt_tokens": 50, "completion_tokens": 0 }
        });
        let request = CompletionRequest::new(2, "Hello", "中文");
        let err = parse_completion(&payload, &request).unwrap_err();
        assert!(err.is_transient());
        assert_eq!(err.usage(), Some(TokenUsage::new(50, 0)));
    }

    #[test]
    fn test_reasoning_block_is_removed() {
        let payload = json!({
            "choices": [{ "message": { "content": "<think>\nthe user wants Chinese\n</think>\n\n你好" } }]
        });
        let request = CompletionRequest::new(0, "Hello", "中文");
        assert_eq!(parse_completion(&payload, &request).unwrap().text, "你好");
    }

    #[test]
    fn test_retryable_status() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable_status(StatusCode::UNAUTHORIZED));
        assert!(!is_retryable_status(StatusCode::BAD_REQUEST));
    }

    /// 本地启动一个仿OpenAI接口，返回其 `api_base`
    async fn stub_server(status: axum::http::StatusCode) -> String {
        use axum::{routing::post, Json, Router};

        let app = Router::new().route(
            "/v1/chat/completions",
            post(move |Json(body): Json<Value>| async move {
                let user = body["messages"][1]["content"].as_str().unwrap_or("").to_string();
                let reply = json!({
                    "choices": [{ "message": { "content": format!("[{}] {}", body["model"].as_str().unwrap_or(""), user) } }],
                    "usage": { "prompt_tokens": 42, "completion_tokens": 7 }
                });
                (status, Json(reply))
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/v1", addr)
    }

    fn client_for(api_base: String) -> OpenAiClient {
        OpenAiClient::new(LlmConfig {
            api_base,
            api_key: "test-key".to_string(),
            model: "stub-model".to_string(),
            ..LlmConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_openai_client_round_trip() {
        let client = client_for(stub_server(axum::http::StatusCode::OK).await);
        let completion = client
            .complete(&CompletionRequest::new(0, "Hello", "中文"))
            .await
            .unwrap();

        assert_eq!(completion.text, "[stub-model] Hello");
        assert_eq!(completion.usage, TokenUsage::new(42, 7));
        assert_eq!(client.provider_name(), "stub-model");
    }

    #[tokio::test]
    async fn test_openai_client_classifies_status() {
        let client = client_for(stub_server(axum::http::StatusCode::SERVICE_UNAVAILABLE).await);
        let err = client.complete(&CompletionRequest::new(0, "x", "en")).await.unwrap_err();
        assert!(err.is_transient());

        let client = client_for(stub_server(axum::http::StatusCode::UNAUTHORIZED).await);
        let err = client.complete(&CompletionRequest::new(0, "x", "en")).await.unwrap_err();
        assert!(!err.is_transient());
        assert!(err.message().contains("401"));
    }

    #[test]
    fn test_token_usage_accumulates() {
        let mut usage = TokenUsage::default();
        usage += TokenUsage::new(3, 4);
        usage += TokenUsage::new(1, 1);
        assert_eq!(usage, TokenUsage::new(4, 5));
        assert_eq!(usage.total(), 9);
    }
}
