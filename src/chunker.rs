//! 文档分块模块
//!
//! 此模块负责：
//! - 按语义分隔符（标题、段落、换行、句末标点）把内容切分为受token预算约束的分块
//! - 单个语义单元超出预算时退化为按token估算的硬切分
//! - 把相邻分块组合为有序分组，作为组内串行、组间并行翻译的调度单元
//!
//! 分块以原文字节区间为基础构造，按顺序拼接所有分块可以无损还原原文。

// 标准库导入
use std::ops::Range;

// 第三方crate导入
use serde::Serialize;
use tracing::{debug, info};

// 本地模块导入
use crate::agent_error;
use crate::api_constants::{chunk_config, error_messages};
use crate::config::AgentConfig;
use crate::error::Result;
use crate::tokenizer::{estimate_tokens, prefix_within_tokens};

/// 分块器配置
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// 单个分块的token上限
    pub max_chunk_tokens: usize,
    /// 每组最多包含的分块数
    pub max_group_chunks: usize,
    /// 每组累计token上限
    pub max_group_tokens: usize,
    /// 允许的最大字符数
    pub max_content_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self::from(&AgentConfig::default())
    }
}

impl From<&AgentConfig> for ChunkerConfig {
    fn from(config: &AgentConfig) -> Self {
        Self {
            max_chunk_tokens: config.max_chunk_tokens,
            max_group_chunks: config.max_group_chunks,
            max_group_tokens: config.max_group_tokens(),
            max_content_chars: config.max_content_chars,
        }
    }
}

/// 最小翻译单元：原文中的一段连续文本
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    /// 在原文中的顺序位置
    pub index: usize,
    /// 原文片段
    pub text: String,
    /// 估算token数
    pub tokens: usize,
}

/// 有序、连续的分块集合，组内按顺序串行翻译
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Group {
    /// 分组序号
    pub index: usize,
    /// 组内分块
    pub chunks: Vec<Chunk>,
}

impl Group {
    /// 组内估算token总数
    pub fn tokens(&self) -> usize {
        self.chunks.iter().map(|c| c.tokens).sum()
    }

    /// 组内分块数
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// 处理耗时估算
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessingEstimate {
    pub total_chunks: usize,
    pub total_groups: usize,
    pub total_tokens: usize,
    pub estimated_seconds: u64,
}

/// 文档分块器
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    /// 创建分块器
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// 获取配置
    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// 分块并分组
    pub fn split(&self, content: &str) -> Result<Vec<Group>> {
        let chunks = self.chunk(content)?;
        Ok(self.group(chunks))
    }

    /// 对文档进行分块
    pub fn chunk(&self, content: &str) -> Result<Vec<Chunk>> {
        if content.is_empty() {
            return Err(agent_error!(chunking, error_messages::EMPTY_CONTENT));
        }

        let char_count = content.chars().count();
        if char_count > self.config.max_content_chars {
            return Err(agent_error!(
                chunking,
                format!(
                    "{}: {} > {}",
                    error_messages::CONTENT_TOO_LARGE,
                    char_count,
                    self.config.max_content_chars
                )
            ));
        }

        let total_tokens = estimate_tokens(content);
        info!(
            "✂️  开始文档分块: {} 字符, 约 {} tokens, 单块上限 {}",
            char_count, total_tokens, self.config.max_chunk_tokens
        );

        let ranges = if total_tokens <= self.config.max_chunk_tokens {
            debug!("文档无需分块，整体作为单个分块");
            vec![0..content.len()]
        } else {
            self.split_segment(content, 0..content.len(), 0)
        };

        let chunks: Vec<Chunk> = ranges
            .into_iter()
            .enumerate()
            .map(|(index, range)| {
                let text = content[range].to_string();
                let tokens = estimate_tokens(&text);
                Chunk { index, text, tokens }
            })
            .collect();

        let max_tokens = chunks.iter().map(|c| c.tokens).max().unwrap_or(0);
        info!(
            "✅ 分块完成: {} 个分块, 最大分块 {} tokens",
            chunks.len(),
            max_tokens
        );

        Ok(chunks)
    }

    /// 将分块组合为连续分组
    ///
    /// 每组最多 `max_group_chunks` 个分块，且累计token不超过 `max_group_tokens`；
    /// 单个超出分组预算的分块独占一组。
    pub fn group(&self, chunks: Vec<Chunk>) -> Vec<Group> {
        let mut groups: Vec<Group> = Vec::new();
        let mut current: Vec<Chunk> = Vec::new();
        let mut current_tokens = 0usize;

        for chunk in chunks {
            let fits = current.len() < self.config.max_group_chunks
                && current_tokens + chunk.tokens <= self.config.max_group_tokens;

            if !fits && !current.is_empty() {
                groups.push(Group {
                    index: groups.len(),
                    chunks: std::mem::take(&mut current),
                });
                current_tokens = 0;
            }

            current_tokens += chunk.tokens;
            current.push(chunk);
        }

        if !current.is_empty() {
            groups.push(Group {
                index: groups.len(),
                chunks: current,
            });
        }

        debug!(
            "分组完成: {} 组, 组大小 {:?}",
            groups.len(),
            groups.iter().map(Group::len).collect::<Vec<_>>()
        );

        groups
    }

    /// 估算处理时间
    pub fn estimate(&self, groups: &[Group]) -> ProcessingEstimate {
        let total_chunks: usize = groups.iter().map(Group::len).sum();
        ProcessingEstimate {
            total_chunks,
            total_groups: groups.len(),
            total_tokens: groups.iter().map(Group::tokens).sum(),
            estimated_seconds: total_chunks as u64 * chunk_config::ESTIMATED_SECONDS_PER_CHUNK,
        }
    }

    /// 递归切分一个区间：从 `level` 开始尝试分隔符，直到所有片段都落在预算内
    fn split_segment(&self, content: &str, range: Range<usize>, level: usize) -> Vec<Range<usize>> {
        let segment = &content[range.clone()];
        if estimate_tokens(segment) <= self.config.max_chunk_tokens {
            return vec![range];
        }

        for (offset, separator) in chunk_config::CHUNK_SEPARATORS.iter().enumerate().skip(level) {
            let pieces = split_keeping_separator(segment, separator);
            if pieces.len() < 2 {
                continue;
            }

            debug!(
                "使用分隔符 {:?} 切分 {} 字节, 得到 {} 段",
                separator,
                segment.len(),
                pieces.len()
            );

            let refined: Vec<Range<usize>> = pieces
                .into_iter()
                .flat_map(|piece| {
                    let absolute = range.start + piece.start..range.start + piece.end;
                    self.split_segment(content, absolute, offset + 1)
                })
                .collect();

            return self.merge_adjacent(content, refined);
        }

        debug!("未找到可用分隔符，按长度硬切分 {} 字节", segment.len());
        self.hard_split(content, range)
    }

    /// 按token预算硬切分，切分点总在字符边界上
    fn hard_split(&self, content: &str, range: Range<usize>) -> Vec<Range<usize>> {
        let mut ranges = Vec::new();
        let mut start = range.start;

        while start < range.end {
            let len = prefix_within_tokens(&content[start..range.end], self.config.max_chunk_tokens);
            ranges.push(start..start + len);
            start += len;
        }

        ranges
    }

    /// 贪心合并相邻片段，避免产生大量细碎分块
    fn merge_adjacent(&self, content: &str, ranges: Vec<Range<usize>>) -> Vec<Range<usize>> {
        let mut merged: Vec<(Range<usize>, usize)> = Vec::with_capacity(ranges.len());

        for range in ranges {
            let tokens = estimate_tokens(&content[range.clone()]);
            if let Some((last, last_tokens)) = merged.last_mut() {
                // 估算值对拼接是次可加的，累加值不超限即保证合并结果不超限
                if *last_tokens + tokens <= self.config.max_chunk_tokens {
                    last.end = range.end;
                    *last_tokens += tokens;
                    continue;
                }
            }
            merged.push((range, tokens));
        }

        merged.into_iter().map(|(range, _)| range).collect()
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(ChunkerConfig::default())
    }
}

/// 按分隔符切分并保留分隔符，返回覆盖整段文本的相对区间
///
/// 标题分隔符（`\n#`）在换行之后切开，使标题行归属于后一段；其余分隔符在其末尾切开。
fn split_keeping_separator(text: &str, separator: &str) -> Vec<Range<usize>> {
    let heading = separator.starts_with("\n#");
    let mut points: Vec<usize> = text
        .match_indices(separator)
        .map(|(pos, sep)| if heading { pos + 1 } else { pos + sep.len() })
        .filter(|&point| point > 0 && point < text.len())
        .collect();
    points.dedup();

    let mut ranges = Vec::with_capacity(points.len() + 1);
    let mut start = 0;
    for point in points {
        if point > start {
            ranges.push(start..point);
            start = point;
        }
    }
    ranges.push(start..text.len());
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(max_chunk_tokens: usize, max_group_chunks: usize) -> Chunker {
        Chunker::new(ChunkerConfig {
            max_chunk_tokens,
            max_group_chunks,
            max_group_tokens: max_chunk_tokens * max_group_chunks,
            max_content_chars: 100_000,
        })
    }

    fn reassemble(chunks: &[Chunk]) -> String {
        chunks.iter().map(|c| c.text.as_str()).collect()
    }

    #[test]
    fn test_small_document_is_single_chunk() {
        let chunks = Chunker::default().chunk("Hello. World.").unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello. World.");
        assert_eq!(chunks[0].index, 0);
    }

    #[test]
    fn test_empty_content_rejected() {
        let err = Chunker::default().chunk("").unwrap_err();
        assert_eq!(err.kind(), "chunking");
    }

    #[test]
    fn test_oversized_content_rejected() {
        let chunker = Chunker::new(ChunkerConfig {
            max_content_chars: 10,
            ..ChunkerConfig::default()
        });
        assert!(chunker.chunk("this is longer than ten").is_err());
        assert!(chunker.chunk("ten chars!").is_ok());
    }

    #[test]
    fn test_round_trip_paragraphs_and_line_endings() {
        let content = "# Title\r\n\r\nFirst paragraph with some words.\r\n\n\n\nSecond paragraph, 中文内容也在这里。还有一句！\n\n\n## Sub\nline one\nline two\r\nline three\n";
        let chunks = chunker(8, 4).chunk(content).unwrap();
        assert!(chunks.len() > 1);
        assert_eq!(reassemble(&chunks), content);
    }

    #[test]
    fn test_round_trip_unicode_hard_split() {
        let content = "蟹".repeat(37) + &"é".repeat(41);
        let chunks = chunker(5, 4).chunk(&content).unwrap();
        assert_eq!(reassemble(&chunks), content);
        assert!(chunks.iter().all(|c| c.tokens <= 5));
    }

    #[test]
    fn test_chunks_respect_budget_and_indices() {
        let content = (0..40)
            .map(|i| format!("Sentence number {} is here. ", i))
            .collect::<String>();
        let chunks = chunker(20, 4).chunk(&content).unwrap();

        assert_eq!(reassemble(&chunks), content);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert!(chunk.tokens <= 20, "chunk {} has {} tokens", i, chunk.tokens);
        }
    }

    #[test]
    fn test_headings_start_new_chunks() {
        let section = "word ".repeat(30);
        let content = format!("# One\n{}\n# Two\n{}", section, section);
        let chunks = chunker(50, 4).chunk(&content).unwrap();

        assert_eq!(reassemble(&chunks), content);
        assert!(chunks.iter().any(|c| c.text.starts_with("# Two")));
    }

    #[test]
    fn test_groups_partition_chunks_contiguously() {
        let content = (0..30)
            .map(|i| format!("Paragraph {} has a few words in it.\n\n", i))
            .collect::<String>();
        let chunker = chunker(12, 3);
        let chunks = chunker.chunk(&content).unwrap();
        let total = chunks.len();
        let groups = chunker.group(chunks);

        let flattened: Vec<usize> = groups
            .iter()
            .flat_map(|g| g.chunks.iter().map(|c| c.index))
            .collect();
        assert_eq!(flattened, (0..total).collect::<Vec<_>>());

        for (i, group) in groups.iter().enumerate() {
            assert_eq!(group.index, i);
            assert!(!group.is_empty());
            assert!(group.len() <= 3);
        }
    }

    #[test]
    fn test_group_token_budget_closes_group() {
        let chunker = Chunker::new(ChunkerConfig {
            max_chunk_tokens: 10,
            max_group_chunks: 10,
            max_group_tokens: 15,
            max_content_chars: 1_000,
        });
        let chunks = (0..4)
            .map(|index| Chunk {
                index,
                text: "x".repeat(40),
                tokens: 10,
            })
            .collect();

        let groups = chunker.group(chunks);
        assert_eq!(groups.len(), 4);
    }

    #[test]
    fn test_estimate() {
        let chunker = chunker(10, 2);
        let groups = chunker.split(&"abcd ".repeat(40)).unwrap();
        let estimate = chunker.estimate(&groups);
        assert_eq!(estimate.total_groups, groups.len());
        assert_eq!(estimate.estimated_seconds, estimate.total_chunks as u64 * 30);
    }

    #[test]
    fn test_split_keeping_separator() {
        let ranges = split_keeping_separator("a\n\nb\n\nc", "\n\n");
        assert_eq!(ranges, vec![0..3, 3..6, 6..7]);

        let text = "intro\n# A\nbody";
        let ranges = split_keeping_separator(text, "\n# ");
        assert_eq!(&text[ranges[0].clone()], "intro\n");
        assert_eq!(&text[ranges[1].clone()], "# A\nbody");
    }
}
