//! 配置管理模块
//!
//! 提供CLI参数解析和翻译服务配置管理功能。
//! 核心组件只接收显式传入的配置结构，环境变量仅在 [`AgentConfig::from_env`] 中读取。

// 标准库导入
use std::path::PathBuf;
use std::time::Duration;

// 第三方crate导入
use clap::{Parser, Subcommand};

// 本地模块导入
use crate::api_constants::{
    chunk_config, engine_config, is_valid_api_base, llm_config, service_config, task_config,
};
use crate::agent_error;
use crate::error::Result;

/// LLM接口配置
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// OpenAI兼容接口地址
    pub api_base: String,
    /// API密钥
    pub api_key: String,
    /// 模型名称
    pub model: String,
    /// 采样温度
    pub temperature: f32,
    /// 单次请求超时（秒）
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: llm_config::DEFAULT_API_BASE.to_string(),
            api_key: String::new(),
            model: llm_config::DEFAULT_MODEL.to_string(),
            temperature: llm_config::DEFAULT_TEMPERATURE,
            request_timeout_secs: llm_config::REQUEST_TIMEOUT_SECONDS,
        }
    }
}

/// 翻译服务配置结构体
///
/// 支持Builder模式进行链式配置。
///
/// # Examples
///
/// ```rust
/// use doc_translation_agent::config::AgentConfig;
///
/// let config = AgentConfig::new()
///     .with_max_chunk_tokens(800)
///     .with_max_group_chunks(3)
///     .with_max_parallel_calls(4)
///     .with_max_retries(5);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// 单个分块的token上限
    pub max_chunk_tokens: usize,
    /// 每组最多包含的分块数
    pub max_group_chunks: usize,
    /// 模型最大上下文token数
    pub max_context_tokens: usize,
    /// 分组token占最大上下文的比例
    pub group_token_ratio: f64,
    /// 单次提交允许的最大字符数
    pub max_content_chars: usize,
    /// 全进程最大并发LLM调用数
    pub max_parallel_calls: usize,
    /// 单个分块的最大重试次数（不含首次调用）
    pub max_retries: usize,
    /// 重试延迟基数（毫秒）
    pub retry_base_delay_ms: u64,
    /// 重试延迟上限（毫秒）
    pub retry_max_delay_ms: u64,
    /// 翻译时附带的前序分块数量
    pub context_chunks: usize,
    /// 终态任务保留时间（秒）
    pub task_ttl_secs: u64,
    /// 内存中最多保留的任务数
    pub max_tasks: usize,
    /// LLM接口配置
    pub llm: LlmConfig,
}

impl AgentConfig {
    /// 创建具有默认值的配置实例
    pub fn new() -> Self {
        Self {
            max_chunk_tokens: chunk_config::DEFAULT_CHUNK_TOKEN_LIMIT,
            max_group_chunks: chunk_config::DEFAULT_GROUP_SIZE,
            max_context_tokens: chunk_config::DEFAULT_MAX_CONTEXT_TOKENS,
            group_token_ratio: chunk_config::GROUP_TOKEN_RATIO,
            max_content_chars: chunk_config::MAX_CONTENT_CHARS,
            max_parallel_calls: engine_config::DEFAULT_MAX_PARALLEL_CALLS,
            max_retries: engine_config::DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: engine_config::RETRY_DELAY_BASE_MS,
            retry_max_delay_ms: engine_config::RETRY_DELAY_MAX_MS,
            context_chunks: engine_config::DEFAULT_CONTEXT_CHUNKS,
            task_ttl_secs: task_config::DEFAULT_TASK_TTL_SECONDS,
            max_tasks: task_config::DEFAULT_MAX_TASKS,
            llm: LlmConfig::default(),
        }
    }

    /// 从 `.env` 文件与环境变量加载配置
    ///
    /// 未设置的变量保持默认值，无法解析的数值返回配置错误。
    pub fn from_env() -> Result<Self> {
        // .env 文件不存在时忽略
        let _ = dotenvy::dotenv();

        let mut config = Self::new();

        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            config.llm.api_key = key;
        }
        if let Ok(base) = std::env::var("OPENAI_API_BASE") {
            config.llm.api_base = base;
        }
        if let Ok(model) = std::env::var("TRANSLATION_MODEL") {
            config.llm.model = model;
        }

        config.max_parallel_calls = env_number("MAX_PARALLEL_GROUPS", config.max_parallel_calls)?;
        config.max_retries = env_number("MAX_RETRIES", config.max_retries)?;
        config.retry_base_delay_ms = env_number("RETRY_BASE_DELAY_MS", config.retry_base_delay_ms)?;
        config.max_chunk_tokens = env_number("CHUNK_TOKEN_LIMIT", config.max_chunk_tokens)?;
        config.max_group_chunks = env_number("GROUP_SIZE", config.max_group_chunks)?;
        config.task_ttl_secs = env_number("TASK_TTL_SECS", config.task_ttl_secs)?;
        config.max_tasks = env_number("MAX_TASKS", config.max_tasks)?;

        config.validate()?;
        Ok(config)
    }

    /// 校验配置的取值范围
    pub fn validate(&self) -> Result<()> {
        if self.max_chunk_tokens == 0 {
            return Err(agent_error!(config, "max_chunk_tokens", "必须大于0"));
        }
        if self.max_group_chunks == 0 {
            return Err(agent_error!(config, "max_group_chunks", "必须大于0"));
        }
        if !(self.group_token_ratio > 0.0 && self.group_token_ratio <= 1.0) {
            return Err(agent_error!(config, "group_token_ratio", "必须位于 (0, 1] 区间"));
        }
        if self.max_parallel_calls == 0 {
            return Err(agent_error!(config, "max_parallel_calls", "必须大于0"));
        }
        if self.max_content_chars == 0 {
            return Err(agent_error!(config, "max_content_chars", "必须大于0"));
        }
        if self.max_tasks == 0 {
            return Err(agent_error!(config, "max_tasks", "必须大于0"));
        }
        if !is_valid_api_base(&self.llm.api_base) {
            return Err(agent_error!(config, "llm.api_base", format!("无效的地址: {}", self.llm.api_base)));
        }
        Ok(())
    }

    /// 分组token预算
    pub fn max_group_tokens(&self) -> usize {
        ((self.max_context_tokens as f64 * self.group_token_ratio) as usize).max(self.max_chunk_tokens)
    }

    /// 终态任务保留时长
    pub fn task_ttl(&self) -> Duration {
        Duration::from_secs(self.task_ttl_secs)
    }

    /// 设置单个分块的token上限
    pub fn with_max_chunk_tokens(mut self, tokens: usize) -> Self {
        self.max_chunk_tokens = tokens;
        self
    }

    /// 设置每组最多包含的分块数
    pub fn with_max_group_chunks(mut self, chunks: usize) -> Self {
        self.max_group_chunks = chunks;
        self
    }

    /// 设置单次提交允许的最大字符数
    pub fn with_max_content_chars(mut self, chars: usize) -> Self {
        self.max_content_chars = chars;
        self
    }

    /// 设置最大并发LLM调用数
    pub fn with_max_parallel_calls(mut self, calls: usize) -> Self {
        self.max_parallel_calls = calls;
        self
    }

    /// 设置最大重试次数
    pub fn with_max_retries(mut self, retries: usize) -> Self {
        self.max_retries = retries;
        self
    }

    /// 设置重试延迟基数与上限（毫秒）
    pub fn with_retry_delay(mut self, base_ms: u64, max_ms: u64) -> Self {
        self.retry_base_delay_ms = base_ms;
        self.retry_max_delay_ms = max_ms;
        self
    }

    /// 设置翻译时附带的前序分块数量
    pub fn with_context_chunks(mut self, chunks: usize) -> Self {
        self.context_chunks = chunks;
        self
    }

    /// 设置任务保留策略
    pub fn with_task_retention(mut self, ttl_secs: u64, max_tasks: usize) -> Self {
        self.task_ttl_secs = ttl_secs;
        self.max_tasks = max_tasks;
        self
    }

    /// 设置LLM接口配置
    pub fn with_llm(mut self, llm: LlmConfig) -> Self {
        self.llm = llm;
        self
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// 读取数值型环境变量
fn env_number<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| agent_error!(config, name, format!("无法解析的数值: {}", raw))),
        Err(_) => Ok(default),
    }
}

/// CLI参数结构
#[derive(Parser)]
#[command(author, version, about = "长文档LLM翻译服务 - 上下文保持分块与异步任务轮询", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// 详细输出模式
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// 静默模式 (仅输出错误)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// 子命令
#[derive(Subcommand)]
pub enum Command {
    /// 启动HTTP翻译服务
    Serve {
        /// 监听地址
        #[arg(long, env = "HOST", default_value = "127.0.0.1")]
        host: String,

        /// 监听端口
        #[arg(long, env = "PORT", default_value = "8000")]
        port: u16,
    },

    /// 直接翻译本地文档
    Translate {
        /// 输入文件路径 (txt / md / html)
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// 输出文件路径 (可选，默认为输入文件名+语言)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// 目标语言
        #[arg(short, long, default_value = service_config::DEFAULT_TARGET_LANGUAGE)]
        lang: String,

        /// 术语表JSON文件 ({"源术语": "译文"})
        #[arg(short, long, value_name = "FILE")]
        terminology: Option<PathBuf>,

        /// 显示统计信息
        #[arg(long)]
        stats: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AgentConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_chunk_tokens, 500);
        assert_eq!(config.max_group_chunks, 4);
        assert_eq!(config.max_group_tokens(), 16_800);
    }

    #[test]
    fn test_builder_chain() {
        let config = AgentConfig::new()
            .with_max_chunk_tokens(100)
            .with_max_group_chunks(2)
            .with_max_parallel_calls(3)
            .with_max_retries(1)
            .with_retry_delay(5, 50)
            .with_task_retention(10, 20);

        assert_eq!(config.max_chunk_tokens, 100);
        assert_eq!(config.max_group_chunks, 2);
        assert_eq!(config.max_parallel_calls, 3);
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.retry_base_delay_ms, 5);
        assert_eq!(config.retry_max_delay_ms, 50);
        assert_eq!(config.task_ttl(), Duration::from_secs(10));
        assert_eq!(config.max_tasks, 20);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(AgentConfig::new().with_max_parallel_calls(0).validate().is_err());
        assert!(AgentConfig::new().with_max_chunk_tokens(0).validate().is_err());

        let mut config = AgentConfig::new();
        config.llm.api_base = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_group_budget_never_below_chunk_budget() {
        let mut config = AgentConfig::new().with_max_chunk_tokens(2_000);
        config.max_context_tokens = 1_000;
        assert_eq!(config.max_group_tokens(), 2_000);
    }

    #[test]
    fn test_cli_parses_translate() {
        let cli = Cli::try_parse_from([
            "translation-agent",
            "translate",
            "--input",
            "doc.md",
            "--lang",
            "English",
        ])
        .unwrap();
        match cli.command {
            Command::Translate { input, lang, .. } => {
                assert_eq!(input, PathBuf::from("doc.md"));
                assert_eq!(lang, "English");
            }
            _ => panic!("Wrong command"),
        }
    }
}
