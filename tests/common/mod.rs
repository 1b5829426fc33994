//! 集成测试共用的构造与轮询工具

use std::sync::Arc;
use std::time::Duration;

use doc_translation_agent::mock::MockLlm;
use doc_translation_agent::task_manager::TaskStatusView;
use doc_translation_agent::{AgentConfig, TaskManager, TaskStatus, TranslationService};

pub fn manager_with(mock: Arc<MockLlm>, config: AgentConfig) -> TaskManager {
    let service = TranslationService::new(&config, mock);
    TaskManager::new(Arc::new(service), &config)
}

pub fn fast_config() -> AgentConfig {
    AgentConfig::new().with_max_retries(2).with_retry_delay(1, 4)
}

/// 轮询直到终态，记录观察到的状态序列（相邻重复合并）
pub async fn poll_until_done(manager: &TaskManager, task_id: &str) -> (TaskStatusView, Vec<TaskStatus>) {
    let mut observed: Vec<TaskStatus> = Vec::new();
    for _ in 0..1000 {
        let view = manager.status(task_id).expect("known task");
        if observed.last() != Some(&view.status) {
            observed.push(view.status);
        }
        if view.status.is_terminal() {
            return (view, observed);
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("task {} never reached a terminal state", task_id);
}

/// 观察到的状态是否为 Pending → Running → terminal 的连续片段
pub fn is_prefix_of_lifecycle(observed: &[TaskStatus], terminal: TaskStatus) -> bool {
    let lifecycle = [TaskStatus::Pending, TaskStatus::Running, terminal];
    let start = lifecycle.iter().position(|s| Some(s) == observed.first());
    match start {
        Some(start) => lifecycle[start..].starts_with(observed),
        None => observed.is_empty(),
    }
}
