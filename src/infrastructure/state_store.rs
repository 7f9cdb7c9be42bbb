use crate::domain::session::{PersistedSession, SessionState};
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const SESSION_STATE_KEY: &str = "pomodoro-timer-state";

/// Durable key-value slots, each overwritten wholesale.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, InfraError>;
    fn put(&self, key: &str, value: &str) -> Result<(), InfraError>;
    fn remove(&self, key: &str) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteKeyValueStore {
    db_path: PathBuf,
}

impl SqliteKeyValueStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }
}

impl KeyValueStore for SqliteKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, InfraError> {
        let connection = self.connect()?;
        let value = connection
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn put(&self, key: &str, value: &str) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO kv_store (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
               value = excluded.value,
               updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute("DELETE FROM kv_store WHERE key = ?1", params![key])?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryKeyValueStore {
    values: Mutex<HashMap<String, String>>,
}

impl InMemoryKeyValueStore {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, InfraError> {
        self.values
            .lock()
            .map_err(|error| InfraError::Storage(format!("key-value lock poisoned: {error}")))
    }
}

impl KeyValueStore for InMemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, InfraError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), InfraError> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), InfraError> {
        self.lock()?.remove(key);
        Ok(())
    }
}

/// JSON codec for the session snapshot slot.
pub struct SessionSnapshotStore<K>
where
    K: KeyValueStore + ?Sized,
{
    store: Arc<K>,
}

impl<K> Clone for SessionSnapshotStore<K>
where
    K: KeyValueStore + ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<K> SessionSnapshotStore<K>
where
    K: KeyValueStore + ?Sized,
{
    pub fn new(store: Arc<K>) -> Self {
        Self { store }
    }

    pub fn save(&self, state: &SessionState, saved_at: DateTime<Utc>) -> Result<(), InfraError> {
        let snapshot = PersistedSession {
            state: state.clone(),
            saved_at,
        };
        let payload = serde_json::to_string(&snapshot)?;
        self.store.put(SESSION_STATE_KEY, &payload)
    }

    pub fn load(&self) -> Result<Option<PersistedSession>, InfraError> {
        let Some(payload) = self.store.get(SESSION_STATE_KEY)? else {
            return Ok(None);
        };
        serde_json::from_str::<PersistedSession>(&payload)
            .map(Some)
            .map_err(|error| InfraError::MalformedPersistedState(error.to_string()))
    }

    pub fn clear(&self) -> Result<(), InfraError> {
        self.store.remove(SESSION_STATE_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::initialize_database;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn sample_state() -> SessionState {
        SessionState {
            active_task_id: Some(3),
            active_task_title: Some("Review PR".to_string()),
            remaining_seconds: 900,
            is_running: true,
            elapsed_seconds: 600,
            remote_session_id: Some(12),
            ..SessionState::idle()
        }
    }

    #[test]
    fn sqlite_store_overwrites_and_removes_slot() {
        let path = std::env::temp_dir().join(format!(
            "pomotask-state-store-test-{}.sqlite",
            std::process::id()
        ));
        initialize_database(&path).expect("init database");
        let store = SqliteKeyValueStore::new(&path);

        store.put("slot", "first").expect("put first");
        store.put("slot", "second").expect("put second");
        assert_eq!(store.get("slot").expect("get"), Some("second".to_string()));

        store.remove("slot").expect("remove");
        assert_eq!(store.get("slot").expect("get after remove"), None);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn snapshot_store_saves_and_loads_state() {
        let snapshots = SessionSnapshotStore::new(Arc::new(InMemoryKeyValueStore::default()));
        let saved_at = fixed_time("2026-02-16T09:00:00Z");
        snapshots.save(&sample_state(), saved_at).expect("save snapshot");

        let loaded = snapshots.load().expect("load").expect("snapshot exists");
        assert_eq!(loaded.state, sample_state());
        assert_eq!(loaded.saved_at, saved_at);

        snapshots.clear().expect("clear");
        assert!(snapshots.load().expect("load after clear").is_none());
    }

    #[test]
    fn corrupt_snapshot_reports_malformed_state() {
        let store = Arc::new(InMemoryKeyValueStore::default());
        store.put(SESSION_STATE_KEY, "{not json").expect("seed corrupt payload");
        let snapshots = SessionSnapshotStore::new(store);
        assert!(matches!(
            snapshots.load(),
            Err(InfraError::MalformedPersistedState(_))
        ));
    }

    #[test]
    fn poisoned_in_memory_store_reports_storage_error() {
        let store = Arc::new(InMemoryKeyValueStore::default());
        let holder = Arc::clone(&store);
        let _ = std::thread::spawn(move || {
            let _guard = holder.values.lock().expect("first lock");
            panic!("poison the store");
        })
        .join();

        assert!(matches!(store.get("any"), Err(InfraError::Storage(_))));
        assert!(matches!(store.put("any", "1"), Err(InfraError::Storage(_))));
    }
}
