//! 会话检查点持久化
//!
//! 按 thread_id 读写完整的 `Session`。内存实现用于测试与单进程运行；
//! JSON 文件实现每个线程一个文件（文件名由 thread_id 编码而来），先写临时文件再 rename，避免读到半截内容。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::core::state::Session;
use crate::core::AgentError;

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// 不存在时返回 Ok(None)
    async fn load(&self, thread_id: &str) -> Result<Option<Session>, AgentError>;

    async fn save(&self, session: &Session) -> Result<(), AgentError>;
}

#[derive(Default)]
pub struct InMemoryCheckpointStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, thread_id: &str) -> Result<Option<Session>, AgentError> {
        Ok(self.sessions.read().await.get(thread_id).cloned())
    }

    async fn save(&self, session: &Session) -> Result<(), AgentError> {
        self.sessions
            .write()
            .await
            .insert(session.thread_id.clone(), session.clone());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct JsonFileCheckpointStore {
    dir: PathBuf,
}

impl JsonFileCheckpointStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// 文件名编码：ASCII 字母数字与 `-` 原样保留，其余字节（含 `_`）写成 `_xx`。
    /// 编码是单射的，不同 thread_id 不会落到同一个文件，也无法构造路径穿越
    fn path_for(&self, thread_id: &str) -> PathBuf {
        let mut name = String::with_capacity(thread_id.len() + 5);
        for b in thread_id.bytes() {
            if b.is_ascii_alphanumeric() || b == b'-' {
                name.push(b as char);
            } else {
                name.push_str(&format!("_{b:02x}"));
            }
        }
        if name.is_empty() {
            name.push('_');
        }
        self.dir.join(format!("{name}.json"))
    }
}

fn io_err(e: impl std::fmt::Display) -> AgentError {
    AgentError::Checkpoint(e.to_string())
}

#[async_trait]
impl CheckpointStore for JsonFileCheckpointStore {
    async fn load(&self, thread_id: &str) -> Result<Option<Session>, AgentError> {
        let path = self.path_for(thread_id);
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(e)),
        };
        let session: Session = serde_json::from_str(&data)
            .map_err(|e| AgentError::Checkpoint(format!("{}: {e}", path.display())))?;
        if session.thread_id != thread_id {
            return Err(AgentError::Checkpoint(format!(
                "{} holds thread '{}', expected '{thread_id}'",
                path.display(),
                session.thread_id
            )));
        }
        Ok(Some(session))
    }

    async fn save(&self, session: &Session) -> Result<(), AgentError> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(io_err)?;
        let path = self.path_for(&session.thread_id);
        let tmp = path.with_extension("json.tmp");
        let data = serde_json::to_string_pretty(session).map_err(io_err)?;
        tokio::fs::write(&tmp, data).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_err)?;
        tracing::debug!(thread_id = %session.thread_id, path = %path.display(), "checkpoint saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::{Content, TurnRole};

    fn sample() -> Session {
        let mut s = Session::new("thread/../1");
        s.push_turn(TurnRole::User, "想去台中");
        s.current_stage = "planner".into();
        s.planner_result = Some(Content::Text("plan".into()));
        s
    }

    #[tokio::test]
    async fn test_in_memory_roundtrip() {
        let store = InMemoryCheckpointStore::new();
        assert!(store.load("x").await.unwrap().is_none());
        let s = sample();
        store.save(&s).await.unwrap();
        assert_eq!(store.load(&s.thread_id).await.unwrap(), Some(s));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_json_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileCheckpointStore::new(dir.path().join("checkpoints"));
        assert!(store.load("missing").await.unwrap().is_none());

        let s = sample();
        store.save(&s).await.unwrap();
        let path = store.path_for(&s.thread_id);
        assert!(path.starts_with(dir.path()));
        assert_eq!(store.load(&s.thread_id).await.unwrap(), Some(s));
    }

    #[tokio::test]
    async fn test_similar_thread_ids_stay_separate() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileCheckpointStore::new(dir.path());

        let mut a = Session::new("user/a");
        a.preferences.insert("owner".into(), "A".into());
        store.save(&a).await.unwrap();
        assert!(store.load("user_a").await.unwrap().is_none());
        assert!(store.load("user.a").await.unwrap().is_none());

        let mut b = Session::new("user_a");
        b.preferences.insert("owner".into(), "B".into());
        store.save(&b).await.unwrap();

        assert_eq!(store.load("user/a").await.unwrap(), Some(a));
        assert_eq!(store.load("user_a").await.unwrap(), Some(b));
        assert_ne!(store.path_for("user/a"), store.path_for("user_a"));
        assert_ne!(store.path_for("台中"), store.path_for("台北"));
    }

    #[tokio::test]
    async fn test_foreign_session_in_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileCheckpointStore::new(dir.path());
        let other = Session::new("other");
        std::fs::write(
            store.path_for("mine"),
            serde_json::to_string(&other).unwrap(),
        )
        .unwrap();
        assert!(matches!(
            store.load("mine").await,
            Err(AgentError::Checkpoint(_))
        ));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_checkpoint_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileCheckpointStore::new(dir.path());
        std::fs::write(store.path_for("bad"), "{not json").unwrap();
        assert!(matches!(
            store.load("bad").await,
            Err(AgentError::Checkpoint(_))
        ));
    }
}
