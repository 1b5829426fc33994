//! 文档翻译服务
//!
//! 组合分块器与翻译引擎：原文 → 分块 → 分组 → 并行组翻译 → 按序合并。
//! 任务管理器和命令行都通过这一层调用翻译流水线。

use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use crate::chunker::{Chunker, ChunkerConfig, ProcessingEstimate};
use crate::config::AgentConfig;
use crate::engine::{EngineConfig, TranslationEngine, TranslationResult};
use crate::error::Result;
use crate::gate::ConcurrencyGate;
use crate::llm::{LlmClient, Terminology};

/// 翻译服务
pub struct TranslationService {
    chunker: Chunker,
    engine: TranslationEngine,
}

impl TranslationService {
    /// 按配置创建服务，闸门容量取 `max_parallel_calls`
    pub fn new(config: &AgentConfig, client: Arc<dyn LlmClient>) -> Self {
        let gate = ConcurrencyGate::new(config.max_parallel_calls);
        Self {
            chunker: Chunker::new(ChunkerConfig::from(config)),
            engine: TranslationEngine::new(client, gate, EngineConfig::from(config)),
        }
    }

    /// 由已构造的组件组装服务
    pub fn from_parts(chunker: Chunker, engine: TranslationEngine) -> Self {
        Self { chunker, engine }
    }

    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    pub fn engine(&self) -> &TranslationEngine {
        &self.engine
    }

    /// 翻译整篇文档
    pub async fn translate_document(
        &self,
        content: &str,
        target_language: &str,
        terminology: &Terminology,
    ) -> Result<TranslationResult> {
        let start = Instant::now();
        let groups = self.chunker.split(content)?;

        let estimate = self.chunker.estimate(&groups);
        info!(
            "📄 文档 {} 字符 → {} 个分块 / {} 组, 约 {} tokens, 预计 {}s",
            content.chars().count(),
            estimate.total_chunks,
            estimate.total_groups,
            estimate.total_tokens,
            estimate.estimated_seconds
        );

        let result = self
            .engine
            .translate(&groups, target_language, terminology)
            .await?;

        info!("📄 文档翻译完成, 总耗时 {:?}", start.elapsed());
        Ok(result)
    }

    /// 只分块不翻译，返回处理规模估算
    pub fn estimate(&self, content: &str) -> Result<ProcessingEstimate> {
        let groups = self.chunker.split(content)?;
        Ok(self.chunker.estimate(&groups))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use crate::mock::{MockLlm, MockMode};

    fn service(mode: MockMode) -> (TranslationService, Arc<MockLlm>) {
        let mock = Arc::new(MockLlm::new(mode));
        let config = AgentConfig::new()
            .with_max_chunk_tokens(8)
            .with_max_group_chunks(2)
            .with_retry_delay(1, 2);
        (TranslationService::new(&config, mock.clone()), mock)
    }

    #[tokio::test]
    async fn test_translate_document_reassembles_structure() {
        let content = "# Title\n\nFirst paragraph of text.\n\nSecond paragraph of text.\n";
        let (service, mock) = service(MockMode::Suffix);

        let result = service
            .translate_document(content, "fr", &Terminology::new())
            .await
            .unwrap();

        assert_eq!(result.original_content(), content);
        assert!(mock.call_count() >= 2);
        let translated = result.translated_content();
        assert!(translated.contains("_fr"));
        assert_eq!(translated.matches("\n\n").count(), content.matches("\n\n").count());
    }

    #[tokio::test]
    async fn test_empty_document_is_a_chunking_error() {
        let (service, mock) = service(MockMode::Echo);
        let err = service
            .translate_document("", "fr", &Terminology::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Chunking { .. }));
        assert_eq!(mock.call_count(), 0);
    }

    #[test]
    fn test_estimate_without_translation() {
        let (service, mock) = service(MockMode::Echo);
        let estimate = service.estimate("One sentence. Another sentence.").unwrap();
        assert!(estimate.total_chunks >= 1);
        assert!(estimate.total_groups >= 1);
        assert_eq!(mock.call_count(), 0);
    }

    #[test]
    fn test_gate_capacity_follows_config() {
        let config = AgentConfig::new().with_max_parallel_calls(3);
        let service = TranslationService::new(&config, Arc::new(MockLlm::new(MockMode::Echo)));
        assert_eq!(service.engine().gate().capacity(), 3);
    }
}
