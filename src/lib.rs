//! Doc Translation Agent - 长文档LLM翻译库
//!
//! 把长文档切分为语义分块，按组并行、组内串行地交给LLM翻译，
//! 并通过异步任务管理器提供提交、轮询与取回结果的能力。

pub mod api_constants;
pub mod chunker;
pub mod config;
pub mod engine;
pub mod error;
pub mod extract;
pub mod gate;
pub mod llm;
pub mod mock;
pub mod server;
pub mod service;
pub mod stats;
pub mod task_manager;
pub mod tokenizer;
pub mod utils;

pub use chunker::{Chunk, Chunker, ChunkerConfig, Group};
pub use config::AgentConfig;
pub use engine::{EngineConfig, TranslationEngine, TranslationResult};
pub use error::{AgentError, Result};
pub use gate::ConcurrencyGate;
pub use llm::{CompletionRequest, LlmClient, Terminology, TokenUsage};
pub use service::TranslationService;
pub use task_manager::{TaskManager, TaskStatus};
