//! 不依赖API密钥的完整流程演示
//!
//! 使用 MockLlm 走一遍 分块 → 提交任务 → 轮询 → 取回结果，并打印运行统计。

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use doc_translation_agent::mock::{MockLlm, MockMode};
use doc_translation_agent::stats::print_translation_stats;
use doc_translation_agent::{AgentConfig, TaskManager, TaskStatus, Terminology, TranslationService};

const SAMPLE: &str = "# Getting Started\n\nThe engine splits long documents into chunks.\n\n\
## Groups\n\nChunks are grouped, and each group is translated in order.\n\n\
Groups run in parallel under a shared limit.\n";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    info!("🚀 开始演示文档翻译流程");

    let config = AgentConfig::new()
        .with_max_chunk_tokens(16)
        .with_max_group_chunks(2)
        .with_max_parallel_calls(2);
    let mock = Arc::new(MockLlm::with_delay(MockMode::Terminology, 20));
    let service = Arc::new(TranslationService::new(&config, mock.clone()));

    let estimate = service.estimate(SAMPLE)?;
    info!(
        "✂️  {} 个分块 / {} 组, 约 {} tokens",
        estimate.total_chunks, estimate.total_groups, estimate.total_tokens
    );

    // 直接调用服务，查看统计
    let mut terms = Terminology::new();
    terms.insert("engine".to_string(), "引擎".to_string());
    terms.insert("chunks".to_string(), "分块".to_string());

    let result = service.translate_document(SAMPLE, "中文", &terms).await?;
    print_translation_stats(
        &result.stats,
        SAMPLE.chars().count(),
        result.translated_content().chars().count(),
    );

    // 通过任务管理器异步执行
    let manager = TaskManager::new(service, &config);
    let task_id = manager.submit(SAMPLE, "中文", terms)?;
    info!("📥 已提交任务 {}", task_id);

    loop {
        let view = manager.status(&task_id)?;
        info!("⏳ 任务状态: {}", view.status);
        if view.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    let output = manager.result(&task_id)?;
    info!("✅ 任务完成, LLM调用 {} 次", mock.call_count());
    println!("\n{}", output.translated_content);

    assert_eq!(manager.status(&task_id)?.status, TaskStatus::Completed);
    Ok(())
}
