/// 翻译服务配置常量
///
/// 该文件定义了所有翻译服务相关的常量配置，方便统一管理和维护

/// 默认LLM接口配置
pub mod llm_config {
    /// 默认OpenAI兼容接口地址
    pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

    /// 默认模型名称
    pub const DEFAULT_MODEL: &str = "Qwen3-30B-A3B";

    /// 默认采样温度
    pub const DEFAULT_TEMPERATURE: f32 = 0.3;

    /// 请求超时时间（秒）
    pub const REQUEST_TIMEOUT_SECONDS: u64 = 120;
}

/// 分块与分组配置
pub mod chunk_config {
    /// 单个分块的token上限
    pub const DEFAULT_CHUNK_TOKEN_LIMIT: usize = 500;

    /// 默认每组分块数量
    pub const DEFAULT_GROUP_SIZE: usize = 4;

    /// 模型最大上下文token数
    pub const DEFAULT_MAX_CONTEXT_TOKENS: usize = 48_000;

    /// 分组token占模型最大上下文的比例
    pub const GROUP_TOKEN_RATIO: f64 = 0.35;

    /// 单次提交允许的最大字符数
    pub const MAX_CONTENT_CHARS: usize = 2_000_000;

    /// 语义分隔符层次（由粗到细）
    pub const CHUNK_SEPARATORS: &[&str] = &[
        "\n# ",
        "\n## ",
        "\n### ",
        "\n#### ",
        "\n##### ",
        "\n###### ",
        "\n\n",
        "\n",
        "。",
        ". ",
        "？",
        "? ",
        "！",
        "! ",
    ];

    /// 估算每个分块的处理耗时（秒）
    pub const ESTIMATED_SECONDS_PER_CHUNK: u64 = 30;
}

/// 翻译引擎配置
pub mod engine_config {
    /// 默认最大并发LLM调用数
    pub const DEFAULT_MAX_PARALLEL_CALLS: usize = 10;

    /// 默认最大重试次数（不含首次调用）
    pub const DEFAULT_MAX_RETRIES: usize = 3;

    /// 重试延迟基数（毫秒）
    pub const RETRY_DELAY_BASE_MS: u64 = 1000;

    /// 重试延迟上限（毫秒）
    pub const RETRY_DELAY_MAX_MS: u64 = 30_000;

    /// 作为上下文传入的前序分块数量
    pub const DEFAULT_CONTEXT_CHUNKS: usize = 1;
}

/// 任务存储配置
pub mod task_config {
    /// 终态任务保留时间（秒）
    pub const DEFAULT_TASK_TTL_SECONDS: u64 = 3600;

    /// 内存中最多保留的任务数
    pub const DEFAULT_MAX_TASKS: usize = 1000;

    /// 后台清理间隔（秒）
    pub const SWEEP_INTERVAL_SECONDS: u64 = 60;
}

/// 翻译服务配置
pub mod service_config {
    /// 默认目标语言
    pub const DEFAULT_TARGET_LANGUAGE: &str = "中文";

    /// 支持的目标语言（名称与ISO 639-1代码）
    pub const SUPPORTED_LANGUAGES: &[&str] = &[
        "zh", "en", "ja", "ko", "fr", "de", "es", "it", "pt", "ru",
        "ar", "hi", "th", "vi", "id", "ms", "nl", "sv", "pl", "tr",
        "chinese", "simplified chinese", "traditional chinese", "english",
        "japanese", "korean", "french", "german", "spanish", "italian",
        "portuguese", "russian", "arabic", "hindi", "thai", "vietnamese",
        "indonesian", "malay", "dutch", "swedish", "polish", "turkish",
        "中文", "简体中文", "繁体中文", "繁體中文", "中国话", "汉语",
        "英文", "英语", "日文", "日语", "日本语", "日本語",
        "韩文", "韩语", "朝鲜语", "한국어",
        "法文", "法语", "français", "德文", "德语", "deutsch",
        "西班牙文", "西班牙语", "español", "俄文", "俄语", "русский",
        "意大利文", "意大利语", "葡萄牙文", "葡萄牙语", "阿拉伯文", "阿拉伯语",
        "泰文", "泰语", "越南文", "越南语",
    ];
}

/// 提示词模板
pub mod prompts {
    /// 翻译系统提示词，`{target_language}` 与 `{terminology_info}` 在运行时替换
    pub const TRANSLATION_SYSTEM_PROMPT: &str = "You are a professional translator specializing in document translation. Your task is to translate the following content into {target_language} while maintaining the highest quality and accuracy.

## Translation Guidelines:

### 1. Names and Places
- Keep original names and places in their source language
- Add the translated version in parentheses every time they appear

### 2. Mathematical Content
- All mathematical expressions and formulas MUST use English terminology
- Format all mathematical content in LaTeX syntax

### 3. Language Quality
- Produce natural, idiomatic {target_language} that reads fluently
- Maintain the original tone and style

### 4. Format Preservation
- Input format: Markdown
- Output format: Maintain identical markdown structure
- Preserve all formatting elements: headers, lists, tables, code blocks, etc.

### 5. Terminology Consistency
{terminology_info}
Output only the translation of the user message, without commentary.
";

    /// 术语表段落标题
    pub const TERMINOLOGY_HEADER: &str =
        "Use these fixed translations for these source terms:";

    /// 前文上下文段落标题
    pub const CONTEXT_HEADER: &str =
        "Preceding source text, for context only. Do not translate it again:";
}

/// 错误消息常量
pub mod error_messages {
    /// 内容为空
    pub const EMPTY_CONTENT: &str = "内容不能为空";

    /// 不支持的语言错误
    pub const UNSUPPORTED_LANGUAGE: &str = "不支持的目标语言";

    /// 术语表条目为空
    pub const EMPTY_TERM: &str = "术语表中的源术语和译文都不能为空";

    /// 内容过大
    pub const CONTENT_TOO_LARGE: &str = "内容超过允许的最大长度";
}

/// 验证语言是否支持（忽略大小写与首尾空白）
pub fn is_supported_language(lang: &str) -> bool {
    let normalized = lang.trim().to_lowercase();
    !normalized.is_empty() && service_config::SUPPORTED_LANGUAGES.contains(&normalized.as_str())
}

/// 验证API地址是否有效
pub fn is_valid_api_base(api_base: &str) -> bool {
    match url::Url::parse(api_base) {
        Ok(url) => url.scheme() == "http" || url.scheme() == "https",
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_validation() {
        assert!(is_supported_language("zh"));
        assert!(is_supported_language("Chinese"));
        assert!(is_supported_language("  中文 "));
        assert!(is_supported_language("ENGLISH"));
        assert!(!is_supported_language("klingon"));

        for lang in [
            "English", "中文", "日文", "韩文", "法文", "德文", "西班牙文", "俄文",
            "意大利文", "葡萄牙文", "阿拉伯文", "泰文", "越南文",
        ] {
            assert!(is_supported_language(lang), "{}", lang);
        }
        for alias in [
            "中国话", "汉语", "日本语", "朝鲜语", "意大利语", "葡萄牙语", "阿拉伯语",
            "泰语", "越南语", "Italian", "portuguese", "Arabic", "thai", "Vietnamese",
        ] {
            assert!(is_supported_language(alias), "{}", alias);
        }
        assert!(!is_supported_language("   "));
    }

    #[test]
    fn test_api_base_validation() {
        assert!(is_valid_api_base("https://api.openai.com/v1"));
        assert!(is_valid_api_base("http://localhost:8000/v1"));
        assert!(!is_valid_api_base("ftp://example.com"));
        assert!(!is_valid_api_base("invalid-url"));
    }

    #[test]
    fn test_group_budget_defaults() {
        let budget = (chunk_config::DEFAULT_MAX_CONTEXT_TOKENS as f64
            * chunk_config::GROUP_TOKEN_RATIO) as usize;
        assert_eq!(budget, 16_800);
        assert!(budget > chunk_config::DEFAULT_CHUNK_TOKEN_LIMIT * chunk_config::DEFAULT_GROUP_SIZE);
    }
}
