//! 翻译引擎核心实现
//!
//! 负责把分组后的文档交给LLM翻译，并把结果按原文顺序合并。
//!
//! ## 调度规则
//! - **组间并行**: 每个分组是一个独立的工作单元，所有分组同时推进，
//!   真正发出的LLM调用数受全进程共享的 [`ConcurrencyGate`] 限制
//! - **组内串行**: 组内分块严格按顺序翻译，第 *i* 个分块的请求携带同组前序分块的原文
//!   作为上下文，并附带术语表，保证跨分块的术语与语气一致
//! - **重试**: 暂时性错误按指数退避重试，次数耗尽或遇到永久性错误时整个任务失败，
//!   其他分组已完成的结果一并丢弃
//! - **用量**: 汇总所有LLM调用的token用量，包括失败的尝试
//!
//! ## 使用示例
//! ```ignore
//! let gate = ConcurrencyGate::new(config.max_parallel_calls);
//! let engine = TranslationEngine::new(client, gate, EngineConfig::from(&config));
//! let result = engine.translate(&groups, "中文", &terminology).await?;
//! println!("{}", result.translated_content());
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::try_join_all;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::agent_error;
use crate::chunker::{Chunk, Group};
use crate::config::AgentConfig;
use crate::error::Result;
use crate::gate::ConcurrencyGate;
use crate::llm::{CompletionRequest, LlmClient, Terminology, TokenUsage};
use crate::stats::{RunCounters, TranslationStats};

/// 引擎配置
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// 单个分块的最大重试次数（不含首次调用）
    pub max_retries: usize,
    /// 重试基础延迟，实际延迟 = base * 2^(重试序号-1)
    pub retry_base_delay: Duration,
    /// 重试延迟上限
    pub retry_max_delay: Duration,
    /// 作为上下文附带的前序分块数量
    pub context_chunks: usize,
}

impl EngineConfig {
    /// 第 `retry` 次重试（从1开始）前的等待时间
    pub fn backoff_delay(&self, retry: usize) -> Duration {
        let exponent = retry.saturating_sub(1).min(20) as u32;
        self.retry_base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.retry_max_delay)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&AgentConfig::default())
    }
}

impl From<&AgentConfig> for EngineConfig {
    fn from(config: &AgentConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
            retry_max_delay: Duration::from_millis(config.retry_max_delay_ms),
            context_chunks: config.context_chunks,
        }
    }
}

/// 单个分块的翻译结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkTranslation {
    /// 分块在原文中的位置
    pub index: usize,
    pub original: String,
    pub translated: String,
    /// 成功前的尝试次数，空白分块为0
    pub attempts: usize,
    /// 本分块所有尝试的用量
    pub usage: TokenUsage,
}

impl ChunkTranslation {
    /// 把译文放回原分块的首尾空白之间，使段落与换行结构保持不变
    pub fn render(&self) -> String {
        if self.original.trim().is_empty() {
            return self.original.clone();
        }

        let body_start = self.original.len() - self.original.trim_start().len();
        let body_end = self.original.trim_end().len();
        format!(
            "{}{}{}",
            &self.original[..body_start],
            self.translated.trim(),
            &self.original[body_end..]
        )
    }
}

/// 整篇文档的翻译结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranslationResult {
    pub target_language: String,
    /// 按原文位置排序的分块译文，每个分块恰好一条
    pub chunks: Vec<ChunkTranslation>,
    /// 所有LLM调用的累计用量
    pub usage: TokenUsage,
    pub stats: TranslationStats,
}

impl TranslationResult {
    /// 合并后的完整译文
    pub fn translated_content(&self) -> String {
        self.chunks.iter().map(ChunkTranslation::render).collect()
    }

    /// 由分块还原的原文
    pub fn original_content(&self) -> String {
        self.chunks.iter().map(|c| c.original.as_str()).collect()
    }
}

/// 翻译引擎
///
/// 引擎本身无可变状态，可在多个任务间通过 `Arc` 共享；
/// 共享同一个引擎的所有任务也共享同一个并发闸门。
pub struct TranslationEngine {
    client: Arc<dyn LlmClient>,
    gate: ConcurrencyGate,
    config: EngineConfig,
}

impl TranslationEngine {
    /// 创建新的翻译引擎
    pub fn new(client: Arc<dyn LlmClient>, gate: ConcurrencyGate, config: EngineConfig) -> Self {
        Self {
            client,
            gate,
            config,
        }
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// 翻译全部分组并按原文顺序合并
    pub async fn translate(
        &self,
        groups: &[Group],
        target_language: &str,
        terminology: &Terminology,
    ) -> Result<TranslationResult> {
        let start = Instant::now();
        let counters = RunCounters::default();
        let total_chunks: usize = groups.iter().map(Group::len).sum();

        info!(
            "🚀 开始并行组翻译: {} 组 / {} 个分块, 目标语言 {}, 术语 {} 条, 提供方 {}",
            groups.len(),
            total_chunks,
            target_language,
            terminology.len(),
            self.client.provider_name()
        );

        let units = groups
            .iter()
            .map(|group| self.translate_group(group, target_language, terminology, &counters));

        // 任一分组失败时其余分组的future被丢弃，持有的许可随之释放
        let group_outputs = try_join_all(units).await.map_err(|e| {
            let usage = counters.usage();
            error!(
                "❌ 翻译失败, 丢弃全部分组结果 (已消耗输入 {} / 输出 {} tokens): {}",
                usage.input_tokens, usage.output_tokens, e
            );
            e.with_usage(usage)
        })?;

        let mut merged: BTreeMap<usize, ChunkTranslation> = BTreeMap::new();
        for translation in group_outputs.into_iter().flatten() {
            let index = translation.index;
            if merged.insert(index, translation).is_some() {
                return Err(agent_error!(internal, format!("分块 #{} 出现在多个分组中", index)));
            }
        }

        let chunks: Vec<ChunkTranslation> = merged.into_values().collect();
        let stats = counters.snapshot(total_chunks, groups.len(), start.elapsed());

        info!(
            "✅ 并行组翻译完成: {} 个分块, {} 次调用, {} 次重试, 输入 {} / 输出 {} tokens, 耗时 {:?}",
            chunks.len(),
            stats.llm_calls,
            stats.retries,
            stats.usage.input_tokens,
            stats.usage.output_tokens,
            stats.elapsed
        );

        Ok(TranslationResult {
            target_language: target_language.to_string(),
            chunks,
            usage: stats.usage,
            stats,
        })
    }

    /// 组内按顺序翻译
    async fn translate_group(
        &self,
        group: &Group,
        target_language: &str,
        terminology: &Terminology,
        counters: &RunCounters,
    ) -> Result<Vec<ChunkTranslation>> {
        let group_start = Instant::now();
        debug!(
            "开始组 {} 翻译: {} 个分块, 约 {} tokens",
            group.index,
            group.len(),
            group.tokens()
        );

        let mut outputs = Vec::with_capacity(group.len());
        for (position, chunk) in group.chunks.iter().enumerate() {
            if chunk.text.trim().is_empty() {
                counters.record_skip();
                outputs.push(ChunkTranslation {
                    index: chunk.index,
                    original: chunk.text.clone(),
                    translated: String::new(),
                    attempts: 0,
                    usage: TokenUsage::default(),
                });
                continue;
            }

            // 只取有正文的前序分块作为上下文
            let mut prior_context: Vec<String> = group.chunks[..position]
                .iter()
                .rev()
                .filter(|c| !c.text.trim().is_empty())
                .take(self.config.context_chunks)
                .map(|c| c.text.clone())
                .collect();
            prior_context.reverse();

            let request = CompletionRequest::new(chunk.index, chunk.text.clone(), target_language)
                .with_terminology(terminology.clone())
                .with_prior_context(prior_context);

            outputs.push(self.translate_chunk(chunk, &request, counters).await?);
        }

        debug!(
            "组 {} 翻译完成, 耗时 {:?}",
            group.index,
            group_start.elapsed()
        );
        Ok(outputs)
    }

    /// 带重试的单分块翻译，每次尝试前获取闸门许可，等待退避期间不占用许可
    async fn translate_chunk(
        &self,
        chunk: &Chunk,
        request: &CompletionRequest,
        counters: &RunCounters,
    ) -> Result<ChunkTranslation> {
        let max_attempts = self.config.max_retries + 1;
        let mut usage = TokenUsage::default();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let outcome = {
                let mut permit = self.gate.acquire().await?;
                let outcome = self.client.complete(request).await;
                permit.release();
                outcome
            };

            match outcome {
                Ok(completion) => {
                    counters.record_call(Some(completion.usage));
                    usage += completion.usage;
                    return Ok(ChunkTranslation {
                        index: chunk.index,
                        original: chunk.text.clone(),
                        translated: completion.text,
                        attempts: attempt,
                        usage,
                    });
                }
                Err(e) => {
                    counters.record_call(e.usage());
                    if let Some(failed_usage) = e.usage() {
                        usage += failed_usage;
                    }

                    if !e.is_transient() || attempt >= max_attempts {
                        warn!(
                            "❌ 分块 #{} 放弃翻译 (尝试 {}/{}): {}",
                            chunk.index, attempt, max_attempts, e
                        );
                        return Err(agent_error!(translation, chunk.index, attempt, e));
                    }

                    let delay = self.config.backoff_delay(attempt);
                    warn!(
                        "分块 #{} 翻译失败，{}ms后重试 (尝试 {}/{}): {}",
                        chunk.index,
                        delay.as_millis(),
                        attempt,
                        max_attempts,
                        e
                    );
                    counters.record_retry();
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
