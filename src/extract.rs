//! 文档文本提取
//!
//! 把上传的原始字节转换为可分块的纯文本：
//! - `txt` / `md`: UTF-8 解码，去掉BOM
//! - `html`: html5ever 解析后按文档顺序遍历，跳过脚本与样式，
//!   块级元素之间以空行分隔，标题转为 Markdown 标题以便按标题分块
//! - `pdf` / `docx`: 需要外部提取器，直接报错

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use base64::{engine::general_purpose, Engine as _};
use html5ever::parse_document;
use html5ever::tendril::TendrilSink;
use markup5ever_rcdom::{Handle, NodeData, RcDom};
use tracing::debug;

use crate::agent_error;
use crate::error::{AgentError, Result};

/// 支持识别的文档格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Text,
    Markdown,
    Html,
    Pdf,
    Docx,
}

impl DocumentFormat {
    /// 由扩展名或MIME类型识别格式
    pub fn from_hint(hint: &str) -> Result<Self> {
        let normalized = hint.trim().trim_start_matches('.').to_lowercase();
        match normalized.as_str() {
            "txt" | "text" | "text/plain" => Ok(DocumentFormat::Text),
            "md" | "markdown" | "text/markdown" => Ok(DocumentFormat::Markdown),
            "html" | "htm" | "xhtml" | "text/html" | "application/xhtml+xml" => {
                Ok(DocumentFormat::Html)
            }
            "pdf" | "application/pdf" => Ok(DocumentFormat::Pdf),
            "docx" | "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                Ok(DocumentFormat::Docx)
            }
            _ => Err(agent_error!(validation, "format", format!("无法识别的文档格式: {}", hint))),
        }
    }

    /// 由文件扩展名识别格式，无扩展名时按纯文本处理
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) => Self::from_hint(ext),
            None => Ok(DocumentFormat::Text),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::Text => "txt",
            DocumentFormat::Markdown => "md",
            DocumentFormat::Html => "html",
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Docx => "docx",
        }
    }
}

impl FromStr for DocumentFormat {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hint(s)
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 提取纯文本
pub fn extract_plain_text(raw: &[u8], format: DocumentFormat) -> Result<String> {
    let text = match format {
        DocumentFormat::Text | DocumentFormat::Markdown => decode_utf8(raw, format)?,
        DocumentFormat::Html => extract_html_text(raw)?,
        DocumentFormat::Pdf | DocumentFormat::Docx => {
            return Err(agent_error!(
                extraction,
                format,
                "该格式需要外部文本提取器，请先转换为 txt / md / html"
            ));
        }
    };

    debug!("📑 {} 文档提取完成: {} 字节 → {} 字符", format, raw.len(), text.chars().count());
    Ok(text)
}

/// 解码 base64 编码的上传内容
pub fn decode_base64(encoded: &str) -> Result<Vec<u8>> {
    general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| agent_error!(validation, "content_base64", format!("base64解码失败: {}", e)))
}

fn decode_utf8(raw: &[u8], format: DocumentFormat) -> Result<String> {
    let text = std::str::from_utf8(raw)
        .map_err(|e| agent_error!(extraction, format, format!("不是有效的UTF-8文本: {}", e)))?;
    Ok(text.strip_prefix('\u{feff}').unwrap_or(text).to_string())
}

fn extract_html_text(raw: &[u8]) -> Result<String> {
    let html = decode_utf8(raw, DocumentFormat::Html)?;
    let dom = parse_document(RcDom::default(), Default::default())
        .from_utf8()
        .read_from(&mut html.as_bytes())
        .map_err(|e| agent_error!(extraction, DocumentFormat::Html, format!("HTML解析失败: {}", e)))?;

    let mut collector = BlockCollector::default();
    collector.walk(&dom.document);
    Ok(collector.finish())
}

/// 不含可翻译文本的元素
const SKIPPED_TAGS: &[&str] = &["script", "style", "noscript", "template", "head", "svg"];

/// 前后需要断开段落的块级元素
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "article", "header", "footer", "main", "aside", "nav",
    "blockquote", "pre", "ul", "ol", "li", "table", "tr", "dl", "dt", "dd",
    "figure", "figcaption", "h1", "h2", "h3", "h4", "h5", "h6", "br", "hr",
];

enum Visit {
    Enter(Handle),
    Leave(String),
}

/// 按文档顺序收集块级文本
#[derive(Default)]
struct BlockCollector {
    blocks: Vec<String>,
    current: String,
    /// 当前块的前缀，如标题的 `## ` 或列表项的 `- `
    prefix: String,
    pre_depth: usize,
}

impl BlockCollector {
    fn walk(&mut self, root: &Handle) {
        let mut stack = vec![Visit::Enter(root.clone())];

        while let Some(visit) = stack.pop() {
            let node = match visit {
                Visit::Enter(node) => node,
                Visit::Leave(tag) => {
                    self.leave(&tag);
                    continue;
                }
            };

            match node.data {
                NodeData::Text { ref contents } => {
                    self.current.push_str(&contents.borrow());
                }
                NodeData::Element { ref name, .. } => {
                    let tag = name.local.as_ref().to_string();
                    if SKIPPED_TAGS.contains(&tag.as_str()) {
                        continue;
                    }
                    self.enter(&tag);
                    stack.push(Visit::Leave(tag));
                    for child in node.children.borrow().iter().rev() {
                        stack.push(Visit::Enter(child.clone()));
                    }
                }
                NodeData::Document => {
                    for child in node.children.borrow().iter().rev() {
                        stack.push(Visit::Enter(child.clone()));
                    }
                }
                _ => {}
            }
        }
    }

    fn enter(&mut self, tag: &str) {
        if !BLOCK_TAGS.contains(&tag) {
            return;
        }
        self.flush();
        match tag {
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let level = tag[1..].parse::<usize>().unwrap_or(1);
                self.prefix = format!("{} ", "#".repeat(level));
            }
            "li" => self.prefix = "- ".to_string(),
            "pre" => self.pre_depth += 1,
            _ => {}
        }
    }

    fn leave(&mut self, tag: &str) {
        if !BLOCK_TAGS.contains(&tag) {
            return;
        }
        self.flush();
        if tag == "pre" {
            self.pre_depth = self.pre_depth.saturating_sub(1);
        }
    }

    fn flush(&mut self) {
        let raw = std::mem::take(&mut self.current);
        let prefix = std::mem::take(&mut self.prefix);

        let text = if self.pre_depth > 0 {
            raw.trim_matches('\n').to_string()
        } else {
            raw.split_whitespace().collect::<Vec<_>>().join(" ")
        };

        if !text.trim().is_empty() {
            self.blocks.push(format!("{}{}", prefix, text));
        }
    }

    fn finish(mut self) -> String {
        self.flush();
        let mut text = self.blocks.join("\n\n");
        if !text.is_empty() {
            text.push('\n');
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_hints() {
        assert_eq!(DocumentFormat::from_hint("MD").unwrap(), DocumentFormat::Markdown);
        assert_eq!(DocumentFormat::from_hint(".html").unwrap(), DocumentFormat::Html);
        assert_eq!(DocumentFormat::from_hint("text/plain").unwrap(), DocumentFormat::Text);
        assert_eq!("pdf".parse::<DocumentFormat>().unwrap(), DocumentFormat::Pdf);
        assert!(DocumentFormat::from_hint("exe").is_err());
        assert_eq!(
            DocumentFormat::from_path(Path::new("notes/readme.md")).unwrap(),
            DocumentFormat::Markdown
        );
    }

    #[test]
    fn test_plain_text_strips_bom() {
        let raw = "\u{feff}Hello\n\nWorld".as_bytes();
        assert_eq!(extract_plain_text(raw, DocumentFormat::Text).unwrap(), "Hello\n\nWorld");
    }

    #[test]
    fn test_invalid_utf8_is_extraction_error() {
        let err = extract_plain_text(&[0xff, 0xfe, 0x00], DocumentFormat::Markdown).unwrap_err();
        assert_eq!(err.kind(), "extraction");
    }

    #[test]
    fn test_binary_formats_rejected() {
        let err = extract_plain_text(b"%PDF-1.7", DocumentFormat::Pdf).unwrap_err();
        assert!(matches!(err, AgentError::Extraction { ref format, .. } if format == "pdf"));
    }

    #[test]
    fn test_html_blocks_and_headings() {
        let html = r#"<html><head><title>T</title><style>p { color: red; }</style></head>
            <body>
              <h2>Getting   started</h2>
              <p>First <b>bold</b> paragraph.</p>
              <script>var x = "hidden";</script>
              <ul><li>one</li><li>two</li></ul>
            </body></html>"#;

        let text = extract_plain_text(html.as_bytes(), DocumentFormat::Html).unwrap();
        assert_eq!(
            text,
            "## Getting started\n\nFirst bold paragraph.\n\n- one\n\n- two\n"
        );
        assert!(!text.contains("hidden"));
        assert!(!text.contains("color"));
    }

    #[test]
    fn test_html_pre_keeps_line_breaks() {
        let html = "<body><pre>fn main() {\n    run();\n}</pre></body>";
        let text = extract_plain_text(html.as_bytes(), DocumentFormat::Html).unwrap();
        assert_eq!(text, "fn main() {\n    run();\n}\n");
    }

    #[test]
    fn test_decode_base64() {
        assert_eq!(decode_base64("SGVsbG8=").unwrap(), b"Hello");
        assert!(matches!(
            decode_base64("***"),
            Err(AgentError::Validation { ref field, .. }) if field == "content_base64"
        ));
    }
}
