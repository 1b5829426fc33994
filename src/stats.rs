use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::llm::TokenUsage;

/// 单次翻译运行的统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TranslationStats {
    pub total_chunks: usize,
    pub total_groups: usize,
    /// 实际发出的LLM调用次数（含失败与重试）
    pub llm_calls: usize,
    /// 重试次数
    pub retries: usize,
    /// 未调用LLM、原样保留的空白分块
    pub skipped_chunks: usize,
    pub usage: TokenUsage,
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
}

/// 并发分组共享的计数器
#[derive(Debug, Default)]
pub(crate) struct RunCounters {
    llm_calls: AtomicUsize,
    retries: AtomicUsize,
    skipped_chunks: AtomicUsize,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
}

impl RunCounters {
    pub(crate) fn record_call(&self, usage: Option<TokenUsage>) {
        self.llm_calls.fetch_add(1, Ordering::Relaxed);
        if let Some(usage) = usage {
            self.input_tokens.fetch_add(usage.input_tokens, Ordering::Relaxed);
            self.output_tokens.fetch_add(usage.output_tokens, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_skip(&self) {
        self.skipped_chunks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn usage(&self) -> TokenUsage {
        TokenUsage::new(
            self.input_tokens.load(Ordering::Relaxed),
            self.output_tokens.load(Ordering::Relaxed),
        )
    }

    pub(crate) fn snapshot(&self, total_chunks: usize, total_groups: usize, elapsed: Duration) -> TranslationStats {
        TranslationStats {
            total_chunks,
            total_groups,
            llm_calls: self.llm_calls.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            skipped_chunks: self.skipped_chunks.load(Ordering::Relaxed),
            usage: self.usage(),
            elapsed,
        }
    }
}

/// 打印翻译统计
pub fn print_translation_stats(stats: &TranslationStats, input_chars: usize, output_chars: usize) {
    println!("\n📊 翻译统计报告:");
    println!("═══════════════════════════════════════");

    println!("✂️  分块:");
    println!("   分块数: {} 个", stats.total_chunks);
    println!("   分组数: {} 组", stats.total_groups);
    println!("   空白分块: {} 个", stats.skipped_chunks);

    println!("\n🤖 LLM调用:");
    println!("   调用次数: {} 次", stats.llm_calls);
    println!("   重试次数: {} 次", stats.retries);
    println!("   输入tokens: {}", stats.usage.input_tokens);
    println!("   输出tokens: {}", stats.usage.output_tokens);

    println!("\n📏 内容:");
    println!("   原文: {} 字符", input_chars);
    println!("   译文: {} 字符", output_chars);

    println!("\n⏱️  总耗时: {}", format_duration(stats.elapsed));
}

/// 格式化持续时间
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        format!("{}ms", millis)
    } else {
        format!("{:.3}s", duration.as_secs_f64())
    }
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.500s");
    }

    #[test]
    fn test_counters_snapshot() {
        let counters = RunCounters::default();
        counters.record_call(Some(TokenUsage::new(10, 5)));
        counters.record_call(None);
        counters.record_retry();
        counters.record_skip();

        let stats = counters.snapshot(3, 1, Duration::from_millis(20));
        assert_eq!(stats.llm_calls, 2);
        assert_eq!(stats.retries, 1);
        assert_eq!(stats.skipped_chunks, 1);
        assert_eq!(stats.usage, TokenUsage::new(10, 5));
        assert_eq!(stats.total_chunks, 3);
    }
}
