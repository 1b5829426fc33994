//! 统一错误处理模块
//!
//! 提供翻译服务的统一错误类型定义和处理机制

// 标准库导入
use std::fmt;

// 第三方crate导入
use anyhow::Error as AnyhowError;

use crate::llm::TokenUsage;

/// 翻译服务统一错误类型
///
/// 任务失败后错误会被保存在任务记录中，每次查询结果时原样返回，因此该类型实现了 `Clone`。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// 提交参数校验失败，任务不会被创建
    Validation {
        /// 字段名称
        field: String,
        /// 校验失败原因
        reason: String,
    },

    /// 内容无法在配置限制内完成分块
    Chunking {
        /// 错误详情
        details: String,
    },

    /// 某个分块在重试耗尽后仍翻译失败
    Translation {
        /// 失败分块在原文中的位置
        chunk_index: usize,
        /// 已尝试次数
        attempts: usize,
        /// 底层原因
        cause: String,
        /// 失败前整个翻译累计的token用量
        usage: TokenUsage,
    },

    /// 未知任务ID
    NotFound {
        /// 任务ID
        task_id: String,
    },

    /// 任务尚未完成（信息性状态，不代表失败）
    NotReady {
        /// 任务ID
        task_id: String,
        /// 当前状态
        status: String,
    },

    /// 文档文本提取失败
    Extraction {
        /// 文档格式
        format: String,
        /// 错误详情
        details: String,
    },

    /// 配置相关错误
    Configuration {
        /// 配置项名称
        field: String,
        /// 错误原因
        reason: String,
    },

    /// 内部处理错误
    Internal {
        /// 错误消息
        message: String,
    },
}

impl AgentError {
    /// 是否为"仍在处理中"的信息性错误
    pub fn is_not_ready(&self) -> bool {
        matches!(self, AgentError::NotReady { .. })
    }

    /// 错误类别标识，用于日志和HTTP响应
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::Validation { .. } => "validation",
            AgentError::Chunking { .. } => "chunking",
            AgentError::Translation { .. } => "translation",
            AgentError::NotFound { .. } => "not_found",
            AgentError::NotReady { .. } => "not_ready",
            AgentError::Extraction { .. } => "extraction",
            AgentError::Configuration { .. } => "configuration",
            AgentError::Internal { .. } => "internal",
        }
    }

    /// 失败时已消耗的token用量，只有翻译错误携带
    pub fn usage(&self) -> Option<TokenUsage> {
        match self {
            AgentError::Translation { usage, .. } => Some(*usage),
            _ => None,
        }
    }

    /// 用整个翻译的累计用量替换翻译错误中的用量
    pub fn with_usage(mut self, total: TokenUsage) -> Self {
        if let AgentError::Translation { usage, .. } = &mut self {
            *usage = total;
        }
        self
    }
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::Validation { field, reason } => {
                write!(f, "输入验证失败 [{}]: {}", field, reason)
            }
            AgentError::Chunking { details } => {
                write!(f, "文档分块失败: {}", details)
            }
            AgentError::Translation {
                chunk_index,
                attempts,
                cause,
                ..
            } => {
                write!(
                    f,
                    "分块 #{} 翻译失败（已尝试 {} 次）: {}",
                    chunk_index, attempts, cause
                )
            }
            AgentError::NotFound { task_id } => {
                write!(f, "任务未找到: {}", task_id)
            }
            AgentError::NotReady { task_id, status } => {
                write!(f, "任务仍在处理中 [{}]，当前状态: {}", task_id, status)
            }
            AgentError::Extraction { format, details } => {
                write!(f, "文档提取失败 [{}]: {}", format, details)
            }
            AgentError::Configuration { field, reason } => {
                write!(f, "配置错误 [{}]: {}", field, reason)
            }
            AgentError::Internal { message } => {
                write!(f, "内部处理错误: {}", message)
            }
        }
    }
}

impl std::error::Error for AgentError {}

/// 翻译服务结果类型别名
pub type Result<T> = std::result::Result<T, AgentError>;

/// 便捷的错误创建宏
#[macro_export]
macro_rules! agent_error {
    (validation, $field:expr, $reason:expr) => {
        $crate::error::AgentError::Validation {
            field: $field.to_string(),
            reason: $reason.to_string(),
        }
    };
    (chunking, $details:expr) => {
        $crate::error::AgentError::Chunking {
            details: $details.to_string(),
        }
    };
    (translation, $index:expr, $attempts:expr, $cause:expr) => {
        $crate::error::AgentError::Translation {
            chunk_index: $index,
            attempts: $attempts,
            cause: $cause.to_string(),
            usage: $crate::llm::TokenUsage::default(),
        }
    };
    (not_found, $task_id:expr) => {
        $crate::error::AgentError::NotFound {
            task_id: $task_id.to_string(),
        }
    };
    (extraction, $format:expr, $details:expr) => {
        $crate::error::AgentError::Extraction {
            format: $format.to_string(),
            details: $details.to_string(),
        }
    };
    (config, $field:expr, $reason:expr) => {
        $crate::error::AgentError::Configuration {
            field: $field.to_string(),
            reason: $reason.to_string(),
        }
    };
    (internal, $msg:expr) => {
        $crate::error::AgentError::Internal {
            message: $msg.to_string(),
        }
    };
}

/// 从anyhow::Error转换为AgentError
impl From<AnyhowError> for AgentError {
    fn from(error: AnyhowError) -> Self {
        AgentError::Internal {
            message: format!("{:#}", error),
        }
    }
}
