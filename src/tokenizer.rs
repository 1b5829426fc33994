//! Token估算模块
//!
//! 不依赖具体模型词表的近似估算：CJK字符按一个token计，其余字符约每4个计一个token。
//! 估算值用于分块预算，以及在上游未返回用量时补齐用量统计。

/// 平均每个token对应的非CJK字符数
const CHARS_PER_TOKEN: usize = 4;

/// 判断字符是否属于CJK文字（汉字、假名、谚文及全角标点）
pub fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x3000..=0x303F
        | 0x3040..=0x30FF
        | 0x3400..=0x4DBF
        | 0x4E00..=0x9FFF
        | 0xAC00..=0xD7AF
        | 0xF900..=0xFAFF
        | 0xFF00..=0xFFEF
    )
}

/// 估算文本的token数量，非空文本至少为1
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }

    let (cjk, other) = text.chars().fold((0usize, 0usize), |(cjk, other), c| {
        if is_cjk(c) {
            (cjk + 1, other)
        } else {
            (cjk, other + 1)
        }
    });

    (cjk + other.div_ceil(CHARS_PER_TOKEN)).max(1)
}

/// 返回从文本开头起、估算token数不超过 `max_tokens` 的最长前缀的字节长度
///
/// 总是落在字符边界上；当第一个字符就超出预算时至少包含该字符，保证调用方能前进。
pub fn prefix_within_tokens(text: &str, max_tokens: usize) -> usize {
    let mut cjk = 0usize;
    let mut other = 0usize;
    let mut end = 0usize;

    for (offset, c) in text.char_indices() {
        if is_cjk(c) {
            cjk += 1;
        } else {
            other += 1;
        }
        let tokens = cjk + other.div_ceil(CHARS_PER_TOKEN);
        if tokens > max_tokens && end > 0 {
            return end;
        }
        end = offset + c.len_utf8();
    }

    end
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_ascii() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("a"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_estimate_cjk() {
        assert_eq!(estimate_tokens("你好世界"), 4);
        assert_eq!(estimate_tokens("你好 abc"), 3);
        assert_eq!(estimate_tokens("こんにちは"), 5);
    }

    #[test]
    fn test_prefix_within_tokens() {
        let text = "abcdefgh";
        assert_eq!(prefix_within_tokens(text, 1), 4);
        assert_eq!(prefix_within_tokens(text, 2), 8);

        let cjk = "你好世界";
        let end = prefix_within_tokens(cjk, 2);
        assert_eq!(&cjk[..end], "你好");
    }

    #[test]
    fn test_prefix_always_advances() {
        assert_eq!(prefix_within_tokens("你", 0), "你".len());
    }
}
