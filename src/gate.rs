//! 并发闸门模块
//!
//! 限制全进程同时进行的LLM调用数量。基于 `tokio::sync::Semaphore`，
//! 等待者按到达顺序（FIFO）获得许可。

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::agent_error;
use crate::error::Result;

/// 计数型准入控制
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl ConcurrencyGate {
    /// 创建闸门，`capacity` 至少为1
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// 获取许可；达到上限时挂起，直到有许可被释放
    pub async fn acquire(&self) -> Result<GatePermit> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| agent_error!(internal, format!("并发闸门已关闭: {}", e)))?;

        debug!("🚦 获得许可, 当前在途 {}/{}", self.in_flight(), self.capacity);
        Ok(GatePermit {
            permit: Some(permit),
        })
    }

    /// 容量上限
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 当前可用许可数
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// 当前已被持有的许可数
    pub fn in_flight(&self) -> usize {
        self.capacity - self.available()
    }
}

/// 闸门许可，离开作用域时自动释放
#[derive(Debug)]
pub struct GatePermit {
    permit: Option<OwnedSemaphorePermit>,
}

impl GatePermit {
    /// 提前释放许可，重复调用无副作用
    pub fn release(&mut self) {
        if self.permit.take().is_some() {
            debug!("🚦 许可已释放");
        }
    }

    /// 是否仍持有许可
    pub fn is_held(&self) -> bool {
        self.permit.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let gate = ConcurrencyGate::new(2);
        let mut first = gate.acquire().await.unwrap();
        let _second = gate.acquire().await.unwrap();
        assert_eq!(gate.available(), 0);
        assert_eq!(gate.in_flight(), 2);

        first.release();
        assert!(!first.is_held());
        assert_eq!(gate.available(), 1);

        // 重复释放不会多归还许可
        first.release();
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn test_release_on_drop() {
        let gate = ConcurrencyGate::new(1);
        {
            let _permit = gate.acquire().await.unwrap();
            assert_eq!(gate.available(), 0);
        }
        assert_eq!(gate.available(), 1);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        assert_eq!(ConcurrencyGate::new(0).capacity(), 1);
    }

    #[tokio::test]
    async fn test_waiters_resume_in_arrival_order() {
        let gate = ConcurrencyGate::new(1);
        let held = gate.acquire().await.unwrap();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..4 {
            let gate = gate.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _permit = gate.acquire().await.unwrap();
                order.lock().unwrap().push(i);
            }));
            // 保证按顺序进入等待队列
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        drop(held);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cap_is_never_exceeded() {
        let gate = ConcurrencyGate::new(3);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let gate = gate.clone();
                let active = active.clone();
                let peak = peak.clone();
                tokio::spawn(async move {
                    let _permit = gate.acquire().await.unwrap();
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(gate.available(), 3);
    }
}
