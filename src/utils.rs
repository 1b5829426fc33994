use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::extract::DocumentFormat;
use crate::llm::Terminology;

/// 初始化日志系统
pub fn init_logging(verbose: bool, quiet: bool) {
    if quiet {
        return;
    }

    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// 验证输入文件，返回识别出的文档格式
pub fn validate_input_file(path: &Path) -> Result<DocumentFormat> {
    if !path.exists() {
        anyhow::bail!("输入文件不存在: {}", path.display());
    }

    if !path.is_file() {
        anyhow::bail!("输入路径不是文件: {}", path.display());
    }

    let format = DocumentFormat::from_path(path)?;
    if matches!(format, DocumentFormat::Pdf | DocumentFormat::Docx) {
        warn!("⚠️  {} 文件需要外部提取器: {}", format, path.display());
    }

    Ok(format)
}

/// 生成输出文件路径: `input.html` → `input_中文.md`
///
/// 提取后的文本不再是原格式，HTML 输入的译文以 Markdown 保存。
pub fn generate_output_path(input: &Path, output: &Option<PathBuf>, lang: &str) -> PathBuf {
    if let Some(output_path) = output {
        return output_path.clone();
    }

    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    let extension = match DocumentFormat::from_path(input) {
        Ok(DocumentFormat::Text) => "txt",
        _ => "md",
    };

    let safe_lang: String = lang
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect();

    let output_name = format!("{}_{}.{}", stem, safe_lang, extension);

    match input.parent() {
        Some(parent) => parent.join(output_name),
        None => PathBuf::from(output_name),
    }
}

/// 读取术语表JSON文件 (`{"源术语": "译文"}`)
pub fn load_terminology(path: &Path) -> Result<Terminology> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("读取术语表失败: {}", path.display()))?;
    let terminology: Terminology = serde_json::from_str(&raw)
        .with_context(|| format!("术语表不是有效的JSON对象: {}", path.display()))?;
    Ok(terminology)
}
