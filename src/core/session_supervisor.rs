//! 会话监管：按 thread_id 串行化轮次、管理取消
//!
//! 同一线程的轮次持同一把 `tokio::sync::Mutex` 依次执行，不同线程互不阻塞。
//! 每个进行中的轮次持有一个 CancellationToken，`cancel(thread_id)` 取消该线程当前轮次。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

/// 进行中轮次的凭证；drop 时释放线程锁并注销取消令牌
pub struct TurnGuard {
    thread_id: String,
    token: CancellationToken,
    tokens: Arc<Mutex<HashMap<String, CancellationToken>>>,
    _lock: OwnedMutexGuard<()>,
}

impl TurnGuard {
    pub fn cancel_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.remove(&self.thread_id);
        }
    }
}

#[derive(Default)]
pub struct SessionSupervisor {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    tokens: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, thread_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(thread_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// 等待该线程上一轮结束后开始新一轮；`parent` 被取消时本轮一并取消
    pub async fn begin_turn(&self, thread_id: &str, parent: Option<&CancellationToken>) -> TurnGuard {
        let lock = self.lock_for(thread_id).lock_owned().await;
        let token = match parent {
            Some(p) => p.child_token(),
            None => CancellationToken::new(),
        };
        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.insert(thread_id.to_string(), token.clone());
        }
        TurnGuard {
            thread_id: thread_id.to_string(),
            token,
            tokens: self.tokens.clone(),
            _lock: lock,
        }
    }

    /// 取消该线程进行中的轮次；没有进行中的轮次时返回 false
    pub fn cancel(&self, thread_id: &str) -> bool {
        let tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        match tokens.get(thread_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, thread_id: &str) -> bool {
        self.tokens
            .lock()
            .map(|t| t.contains_key(thread_id))
            .unwrap_or(false)
    }
}
