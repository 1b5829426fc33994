//! 异步翻译任务管理
//!
//! 任务状态机: Pending → Running → Completed | Error，终态之后不再变化。
//!
//! - `submit` 同步校验参数后立即返回任务ID，翻译在后台 tokio 任务中执行
//! - `status` / `result` 供调用方轮询
//! - 任务记录保存在 [`TaskStore`] 中，过期的终态记录由 [`EvictionPolicy`] 回收，
//!   回收在每次提交时惰性执行，也可以用 [`TaskManager::spawn_sweeper`] 定期执行

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::agent_error;
use crate::api_constants::{error_messages, is_supported_language};
use crate::config::AgentConfig;
use crate::engine::TranslationResult;
use crate::error::{AgentError, Result};
use crate::llm::{Terminology, TokenUsage};
use crate::service::TranslationService;

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl TaskStatus {
    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Error)
    }

    /// 检查状态转换是否合法
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        matches!(
            (self, target),
            (TaskStatus::Pending, TaskStatus::Running)
                | (TaskStatus::Running, TaskStatus::Completed)
                | (TaskStatus::Running, TaskStatus::Error)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 任务记录，只由任务自身的后台执行修改
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: String,
    pub content: Arc<str>,
    pub target_language: String,
    pub terminology: Terminology,
    pub status: TaskStatus,
    pub result: Option<TranslationResult>,
    pub error: Option<AgentError>,
    pub usage: TokenUsage,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// 经历过的状态，首项总是 Pending
    pub transitions: Vec<TaskStatus>,
}

impl TaskRecord {
    fn new(id: String, content: Arc<str>, target_language: String, terminology: Terminology) -> Self {
        Self {
            id,
            content,
            target_language,
            terminology,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            usage: TokenUsage::default(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            transitions: vec![TaskStatus::Pending],
        }
    }

    fn transition(&mut self, target: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(target) {
            return Err(agent_error!(
                internal,
                format!("非法状态转换: {} -> {} (任务 {})", self.status, target, self.id)
            ));
        }

        let now = Utc::now();
        match target {
            TaskStatus::Running => self.started_at = Some(now),
            TaskStatus::Completed | TaskStatus::Error => self.finished_at = Some(now),
            TaskStatus::Pending => {}
        }
        self.status = target;
        self.transitions.push(target);
        Ok(())
    }

    fn complete(&mut self, result: TranslationResult) -> Result<()> {
        self.transition(TaskStatus::Completed)?;
        self.usage = result.usage;
        self.result = Some(result);
        Ok(())
    }

    fn fail(&mut self, error: AgentError) -> Result<()> {
        self.transition(TaskStatus::Error)?;
        self.usage = error.usage().unwrap_or_default();
        self.error = Some(error);
        Ok(())
    }

    fn view(&self) -> TaskStatusView {
        TaskStatusView {
            task_id: self.id.clone(),
            status: self.status,
            error: self.error.as_ref().map(|e| e.to_string()),
            usage: self.usage,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            transitions: self.transitions.clone(),
        }
    }

    fn candidate(&self) -> EvictionCandidate {
        EvictionCandidate {
            id: self.id.clone(),
            status: self.status,
            created_at: self.created_at,
            finished_at: self.finished_at,
        }
    }
}

/// 状态查询结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskStatusView {
    pub task_id: String,
    pub status: TaskStatus,
    pub error: Option<String>,
    pub usage: TokenUsage,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub transitions: Vec<TaskStatus>,
}

/// 已完成任务的翻译输出
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranslationOutput {
    pub task_id: String,
    pub translated_content: String,
    pub original_content: String,
    pub target_language: String,
    pub usage: TokenUsage,
}

/// 任务存储概况
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskStoreSnapshot {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub error: usize,
}

/// 回收策略的输入，不含任务内容
#[derive(Debug, Clone)]
pub struct EvictionCandidate {
    pub id: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// 任务回收策略
pub trait EvictionPolicy: Send + Sync {
    /// 返回应当删除的任务ID，策略不得选择非终态任务
    fn select(&self, candidates: &[EvictionCandidate], now: DateTime<Utc>) -> Vec<String>;
}

/// 按存活时间与数量上限回收终态任务
#[derive(Debug, Clone)]
pub struct TtlEviction {
    pub ttl: Duration,
    pub max_tasks: usize,
}

impl TtlEviction {
    pub fn new(ttl: Duration, max_tasks: usize) -> Self {
        Self { ttl, max_tasks }
    }

    fn expired(&self, candidate: &EvictionCandidate, now: DateTime<Utc>) -> bool {
        candidate
            .finished_at
            .and_then(|finished| (now - finished).to_std().ok())
            .map(|age| age >= self.ttl)
            .unwrap_or(false)
    }
}

impl From<&AgentConfig> for TtlEviction {
    fn from(config: &AgentConfig) -> Self {
        Self::new(config.task_ttl(), config.max_tasks)
    }
}

impl EvictionPolicy for TtlEviction {
    fn select(&self, candidates: &[EvictionCandidate], now: DateTime<Utc>) -> Vec<String> {
        let (expired, mut retained): (Vec<&EvictionCandidate>, Vec<&EvictionCandidate>) = candidates
            .iter()
            .filter(|c| c.status.is_terminal())
            .partition(|c| self.expired(c, now));

        let mut evicted: Vec<String> = expired.into_iter().map(|c| c.id.clone()).collect();

        let remaining = candidates.len() - evicted.len();
        if remaining > self.max_tasks {
            retained.sort_by_key(|c| c.finished_at.unwrap_or(c.created_at));
            evicted.extend(
                retained
                    .into_iter()
                    .take(remaining - self.max_tasks)
                    .map(|c| c.id.clone()),
            );
        }

        evicted
    }
}

/// 并发安全的任务存储
pub struct TaskStore {
    records: DashMap<String, TaskRecord>,
    policy: Box<dyn EvictionPolicy>,
}

impl TaskStore {
    pub fn new(policy: Box<dyn EvictionPolicy>) -> Self {
        Self {
            records: DashMap::new(),
            policy,
        }
    }

    fn insert(&self, record: TaskRecord) {
        self.records.insert(record.id.clone(), record);
    }

    /// 在记录上执行只读操作
    pub fn read<R>(&self, task_id: &str, f: impl FnOnce(&TaskRecord) -> R) -> Result<R> {
        self.records
            .get(task_id)
            .map(|record| f(record.value()))
            .ok_or_else(|| agent_error!(not_found, task_id))
    }

    fn update<R>(&self, task_id: &str, f: impl FnOnce(&mut TaskRecord) -> Result<R>) -> Result<R> {
        let mut record = self
            .records
            .get_mut(task_id)
            .ok_or_else(|| agent_error!(not_found, task_id))?;
        f(record.value_mut())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn snapshot(&self) -> TaskStoreSnapshot {
        let mut snapshot = TaskStoreSnapshot::default();
        for record in self.records.iter() {
            snapshot.total += 1;
            match record.status {
                TaskStatus::Pending => snapshot.pending += 1,
                TaskStatus::Running => snapshot.running += 1,
                TaskStatus::Completed => snapshot.completed += 1,
                TaskStatus::Error => snapshot.error += 1,
            }
        }
        snapshot
    }

    /// 按回收策略删除记录，返回删除数量
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let candidates: Vec<EvictionCandidate> =
            self.records.iter().map(|record| record.candidate()).collect();

        let mut removed = 0;
        for id in self.policy.select(&candidates, now) {
            // 选择与删除之间状态可能变化，只删除仍为终态的记录
            if self
                .records
                .remove_if(&id, |_, record| record.status.is_terminal())
                .is_some()
            {
                removed += 1;
            }
        }

        if removed > 0 {
            debug!("🧹 回收 {} 个过期任务, 剩余 {}", removed, self.records.len());
        }
        removed
    }
}

/// 任务管理器
#[derive(Clone)]
pub struct TaskManager {
    service: Arc<TranslationService>,
    store: Arc<TaskStore>,
}

impl TaskManager {
    /// 使用按配置构造的 [`TtlEviction`] 创建任务管理器
    pub fn new(service: Arc<TranslationService>, config: &AgentConfig) -> Self {
        Self::with_policy(service, Box::new(TtlEviction::from(config)))
    }

    /// 使用自定义回收策略创建任务管理器
    pub fn with_policy(service: Arc<TranslationService>, policy: Box<dyn EvictionPolicy>) -> Self {
        Self {
            service,
            store: Arc::new(TaskStore::new(policy)),
        }
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    /// 提交翻译任务
    ///
    /// 校验失败时直接返回 `Validation` 错误，不创建任务。
    /// 成功时记录以 Pending 状态入库，后台执行被调度后立即返回任务ID。
    /// 必须在 tokio 运行时内调用。
    pub fn submit(
        &self,
        content: impl Into<String>,
        target_language: &str,
        terminology: Terminology,
    ) -> Result<String> {
        let content = content.into();
        validate_submission(&content, target_language, &terminology)?;

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| agent_error!(internal, format!("没有可用的tokio运行时: {}", e)))?;

        self.store.sweep(Utc::now());

        let task_id = Uuid::new_v4().to_string();
        let record = TaskRecord::new(
            task_id.clone(),
            Arc::from(content),
            target_language.trim().to_string(),
            terminology,
        );
        info!(
            "📥 新任务 {}: {} 字符 → {}",
            task_id,
            record.content.chars().count(),
            record.target_language
        );
        self.store.insert(record);

        runtime.spawn(run_task(
            self.service.clone(),
            self.store.clone(),
            task_id.clone(),
        ));

        Ok(task_id)
    }

    /// 查询任务状态
    pub fn status(&self, task_id: &str) -> Result<TaskStatusView> {
        self.store.read(task_id, TaskRecord::view)
    }

    /// 获取任务结果
    ///
    /// 未完成时返回 `NotReady`，失败时返回保存的错误。
    pub fn result(&self, task_id: &str) -> Result<TranslationOutput> {
        self.store.read(task_id, |record| match record.status {
            TaskStatus::Pending | TaskStatus::Running => Err(AgentError::NotReady {
                task_id: record.id.clone(),
                status: record.status.to_string(),
            }),
            TaskStatus::Error => Err(record
                .error
                .clone()
                .unwrap_or_else(|| agent_error!(internal, "任务失败但未记录错误"))),
            TaskStatus::Completed => match &record.result {
                Some(result) => Ok(TranslationOutput {
                    task_id: record.id.clone(),
                    translated_content: result.translated_content(),
                    original_content: record.content.to_string(),
                    target_language: record.target_language.clone(),
                    usage: record.usage,
                }),
                None => Err(agent_error!(internal, "任务已完成但缺少结果")),
            },
        })?
    }

    /// 任务存储概况
    pub fn snapshot(&self) -> TaskStoreSnapshot {
        self.store.snapshot()
    }

    /// 立即执行一次回收
    pub fn sweep(&self) -> usize {
        self.store.sweep(Utc::now())
    }

    /// 启动后台定期回收，返回的句柄可用于停止
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let store = self.store.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                store.sweep(Utc::now());
            }
        })
    }
}

fn validate_submission(content: &str, target_language: &str, terminology: &Terminology) -> Result<()> {
    if content.trim().is_empty() {
        return Err(agent_error!(validation, "content", error_messages::EMPTY_CONTENT));
    }

    if !is_supported_language(target_language) {
        return Err(agent_error!(
            validation,
            "target_language",
            format!("{}: {}", error_messages::UNSUPPORTED_LANGUAGE, target_language)
        ));
    }

    if terminology
        .iter()
        .any(|(source, target)| source.trim().is_empty() || target.trim().is_empty())
    {
        return Err(agent_error!(validation, "terminology", error_messages::EMPTY_TERM));
    }

    Ok(())
}

/// 后台执行单个任务
async fn run_task(service: Arc<TranslationService>, store: Arc<TaskStore>, task_id: String) {
    let started = store.update(&task_id, |record| {
        record.transition(TaskStatus::Running)?;
        Ok((
            record.content.clone(),
            record.target_language.clone(),
            record.terminology.clone(),
        ))
    });

    let (content, target_language, terminology) = match started {
        Ok(inputs) => inputs,
        Err(e) => {
            warn!("任务 {} 无法开始: {}", task_id, e);
            return;
        }
    };

    debug!("▶️ 任务 {} 开始执行", task_id);

    let outcome = AssertUnwindSafe(service.translate_document(&content, &target_language, &terminology))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Err(agent_error!(internal, "翻译任务异常终止")));

    let recorded = match outcome {
        Ok(result) => {
            info!(
                "✅ 任务 {} 完成: {} 个分块, 输入 {} / 输出 {} tokens",
                task_id,
                result.chunks.len(),
                result.usage.input_tokens,
                result.usage.output_tokens
            );
            store.update(&task_id, |record| record.complete(result))
        }
        Err(e) => {
            error!("❌ 任务 {} 失败: {}", task_id, e);
            store.update(&task_id, |record| record.fail(e))
        }
    };

    if let Err(e) = recorded {
        warn!("任务 {} 结果无法写入: {}", task_id, e);
    }
}
