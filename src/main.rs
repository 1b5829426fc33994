use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

use doc_translation_agent::api_constants::{is_supported_language, task_config};
use doc_translation_agent::config::{AgentConfig, Cli, Command};
use doc_translation_agent::extract::extract_plain_text;
use doc_translation_agent::llm::{OpenAiClient, Terminology};
use doc_translation_agent::server;
use doc_translation_agent::service::TranslationService;
use doc_translation_agent::stats::{format_duration, print_translation_stats};
use doc_translation_agent::task_manager::TaskManager;
use doc_translation_agent::utils::{
    generate_output_path, init_logging, load_terminology, validate_input_file,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 初始化日志系统
    init_logging(cli.verbose, cli.quiet);

    let outcome = match &cli.command {
        Command::Serve { host, port } => run_server(host, *port).await,
        Command::Translate {
            input,
            output,
            lang,
            terminology,
            stats,
        } => {
            let output_path = generate_output_path(input, output, lang);
            run_translate(
                input,
                &output_path,
                lang,
                terminology.as_deref(),
                *stats || cli.verbose,
                cli.quiet,
            )
            .await
        }
    };

    if let Err(e) = outcome {
        error!("❌ 执行失败: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

fn build_service(config: &AgentConfig) -> Result<Arc<TranslationService>> {
    let client = OpenAiClient::new(config.llm.clone()).context("创建LLM客户端失败")?;
    info!(
        "🤖 模型: {} @ {}, 并发上限 {}, 重试 {} 次",
        config.llm.model, config.llm.api_base, config.max_parallel_calls, config.max_retries
    );
    Ok(Arc::new(TranslationService::new(config, Arc::new(client))))
}

/// 启动HTTP服务
async fn run_server(host: &str, port: u16) -> Result<()> {
    let config = AgentConfig::from_env().context("加载配置失败")?;
    let service = build_service(&config)?;

    let manager = TaskManager::new(service, &config);
    let sweeper = manager.spawn_sweeper(Duration::from_secs(task_config::SWEEP_INTERVAL_SECONDS));

    let result = server::serve(manager, &format!("{}:{}", host, port)).await;
    sweeper.abort();
    result
}

/// 直接翻译本地文件
async fn run_translate(
    input: &Path,
    output_path: &Path,
    lang: &str,
    terminology_path: Option<&Path>,
    show_stats: bool,
    quiet: bool,
) -> Result<()> {
    let format = validate_input_file(input)?;
    if !is_supported_language(lang) {
        anyhow::bail!("不支持的目标语言: {}", lang);
    }

    let config = AgentConfig::from_env().context("加载配置失败")?;
    let service = build_service(&config)?;

    let terminology = match terminology_path {
        Some(path) => load_terminology(path)?,
        None => Terminology::new(),
    };

    if !quiet {
        info!("🚀 启动文档翻译");
        info!("📂 输入文件: {}", input.display());
        info!("📄 输出文件: {}", output_path.display());
        info!("🌐 目标语言: {}", lang);
        if !terminology.is_empty() {
            info!("📖 术语表: {} 条", terminology.len());
        }
    }

    let total_start = Instant::now();

    let raw = std::fs::read(input).with_context(|| format!("读取输入文件失败: {}", input.display()))?;
    let content = extract_plain_text(&raw, format)?;

    let result = service
        .translate_document(&content, lang, &terminology)
        .await?;
    let translated = result.translated_content();

    std::fs::write(output_path, &translated)
        .with_context(|| format!("写入输出文件失败: {}", output_path.display()))?;

    if !quiet {
        info!("✅ 翻译完成！总耗时: {}", format_duration(total_start.elapsed()));
    }

    if show_stats {
        print_translation_stats(
            &result.stats,
            content.chars().count(),
            translated.chars().count(),
        );
    }

    Ok(())
}
