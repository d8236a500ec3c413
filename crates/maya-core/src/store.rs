//! Profile & History store (SQLite).
//!
//! - `profile(key, value)`: small key/value identity table, seeded once with insert-or-ignore.
//! - `history(id, role, content)`: append-only turn log; `id` is the monotonic sequence.
//!
//! Every operation opens its own connection and drops it before returning, on success and
//! error paths alike. Nothing is shared across requests except the file.

use crate::config::IDENTITY_KEY;
use crate::error::StoreError;
use crate::types::{Role, Turn};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const UPSERT_PROFILE_SQL: &str =
    "INSERT INTO profile (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = excluded.value";

/// Snapshot of the profile table.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
#[serde(transparent)]
pub struct Profile {
    values: BTreeMap<String, String>,
}

impl Profile {
    pub fn new(values: BTreeMap<String, String>) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Identity name, or `fallback` if the row is absent or blank.
    pub fn identity_name<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.get(IDENTITY_KEY)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(fallback)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.values.iter()
    }

    pub fn into_inner(self) -> BTreeMap<String, String> {
        self.values
    }
}

/// Store operations the orchestrator and the gateway depend on.
pub trait ConversationStore: Send + Sync {
    fn get_profile_value(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn profile(&self) -> Result<Profile, StoreError>;

    fn set_profile_value(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Upserts every pair in one transaction; nothing is written if any pair is rejected.
    fn set_profile_values(&self, values: &BTreeMap<String, String>) -> Result<(), StoreError>;

    /// Appends a single turn and returns its sequence id.
    fn append_turn(&self, role: Role, content: &str) -> Result<i64, StoreError>;

    /// Appends a user turn and its assistant reply in one transaction.
    fn append_exchange(&self, user: &str, assistant: &str) -> Result<(i64, i64), StoreError>;

    /// Most recent user messages, newest first.
    fn list_recent_user_turns(&self, limit: usize) -> Result<Vec<String>, StoreError>;

    /// The last `limit` turns of either role, oldest first.
    fn list_turns(&self, limit: usize) -> Result<Vec<Turn>, StoreError>;

    /// Deletes every turn; returns how many were removed.
    fn clear_all_turns(&self) -> Result<usize, StoreError>;
}

/// Runs a store operation on the blocking pool so SQLite I/O never stalls the runtime.
pub async fn run_blocking<T, F>(store: &Arc<dyn ConversationStore>, op: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce(&dyn ConversationStore) -> Result<T, StoreError> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || op(store.as_ref()))
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
}

#[derive(Debug, Clone)]
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    /// Opens (creating if needed) the database and seeds `defaults` into the profile table.
    pub fn open(
        db_path: impl Into<PathBuf>,
        defaults: &BTreeMap<String, String>,
    ) -> Result<Self, StoreError> {
        let this = Self {
            db_path: db_path.into(),
        };
        this.init(defaults)?;
        Ok(this)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open_with_flags(
            &self.db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(conn)
    }

    fn init(&self, defaults: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS profile (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                role TEXT NOT NULL,
                content TEXT NOT NULL
            );
            "#,
        )?;

        let tx = conn.transaction()?;
        for (key, value) in defaults {
            tx.execute(
                "INSERT OR IGNORE INTO profile (key, value) VALUES (?1, ?2)",
                params![key, value],
            )?;
        }
        tx.commit()?;
        tracing::debug!(target: "maya::store", path = %self.db_path.display(), "Store initialized");
        Ok(())
    }
}

impl ConversationStore for SqliteStore {
    fn get_profile_value(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.connect()?;
        let value = conn
            .query_row("SELECT value FROM profile WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    fn profile(&self) -> Result<Profile, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT key, value FROM profile")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
        let mut values = BTreeMap::new();
        for row in rows {
            let (k, v) = row?;
            values.insert(k, v);
        }
        Ok(Profile::new(values))
    }

    fn set_profile_value(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if key == IDENTITY_KEY && value.trim().is_empty() {
            return Err(StoreError::EmptyIdentity(key.to_string()));
        }
        let conn = self.connect()?;
        conn.execute(UPSERT_PROFILE_SQL, params![key, value])?;
        Ok(())
    }

    fn set_profile_values(&self, values: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some((key, _)) = values
            .iter()
            .find(|(k, v)| k.as_str() == IDENTITY_KEY && v.trim().is_empty())
        {
            return Err(StoreError::EmptyIdentity(key.clone()));
        }
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        for (key, value) in values {
            tx.execute(UPSERT_PROFILE_SQL, params![key, value])?;
        }
        tx.commit()?;
        Ok(())
    }

    fn append_turn(&self, role: Role, content: &str) -> Result<i64, StoreError> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO history (role, content) VALUES (?1, ?2)",
            params![role.as_str(), content],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn append_exchange(&self, user: &str, assistant: &str) -> Result<(i64, i64), StoreError> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO history (role, content) VALUES (?1, ?2)",
            params![Role::User.as_str(), user],
        )?;
        let user_id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO history (role, content) VALUES (?1, ?2)",
            params![Role::Assistant.as_str(), assistant],
        )?;
        let assistant_id = tx.last_insert_rowid();
        tx.commit()?;
        Ok((user_id, assistant_id))
    }

    fn list_recent_user_turns(&self, limit: usize) -> Result<Vec<String>, StoreError> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare("SELECT content FROM history WHERE role = ?1 ORDER BY id DESC LIMIT ?2")?;
        let rows = stmt.query_map(params![Role::User.as_str(), limit as i64], |row| {
            row.get::<_, String>(0)
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn list_turns(&self, limit: usize) -> Result<Vec<Turn>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT id, role, content FROM history ORDER BY id DESC LIMIT ?1")?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut turns = Vec::new();
        for row in rows {
            let (sequence, role, content) = row?;
            match Role::parse(&role) {
                Some(role) => turns.push(Turn {
                    sequence,
                    role,
                    content,
                }),
                None => {
                    tracing::warn!(target: "maya::store", sequence, %role, "Skipping history row with unknown role");
                }
            }
        }
        turns.reverse();
        Ok(turns)
    }

    fn clear_all_turns(&self) -> Result<usize, StoreError> {
        let conn = self.connect()?;
        let removed = conn.execute("DELETE FROM history", [])?;
        tracing::info!(target: "maya::store", removed, "History cleared");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> BTreeMap<String, String> {
        [("name", "Suhash"), ("role", "Lead Developer")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn temp_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("nested/memory.db"), &defaults()).unwrap();
        (dir, store)
    }

    #[test]
    fn seeds_profile_once() {
        let (dir, store) = temp_store();
        store.set_profile_value("name", "Ada").unwrap();

        // Reopening must not overwrite the edited identity.
        let reopened = SqliteStore::open(store.path().to_path_buf(), &defaults()).unwrap();
        assert_eq!(reopened.get_profile_value("name").unwrap().as_deref(), Some("Ada"));
        assert_eq!(reopened.get_profile_value("role").unwrap().as_deref(), Some("Lead Developer"));
        assert_eq!(reopened.get_profile_value("missing").unwrap(), None);
        drop(dir);
    }

    #[test]
    fn empty_identity_is_rejected() {
        let (_dir, store) = temp_store();
        assert!(matches!(
            store.set_profile_value("name", "  "),
            Err(StoreError::EmptyIdentity(_))
        ));
        assert_eq!(store.profile().unwrap().identity_name("User"), "Suhash");
    }

    #[test]
    fn batch_profile_update_is_all_or_nothing() {
        let (_dir, store) = temp_store();
        let update: BTreeMap<String, String> = [("role", "CTO"), ("tech", "Rust")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        store.set_profile_values(&update).unwrap();
        assert_eq!(store.get_profile_value("role").unwrap().as_deref(), Some("CTO"));
        assert_eq!(store.get_profile_value("tech").unwrap().as_deref(), Some("Rust"));

        let rejected: BTreeMap<String, String> = [("name", " "), ("role", "Intern"), ("tech", "Go")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert!(matches!(
            store.set_profile_values(&rejected),
            Err(StoreError::EmptyIdentity(_))
        ));
        let profile = store.profile().unwrap();
        assert_eq!(profile.get("name"), Some("Suhash"));
        assert_eq!(profile.get("role"), Some("CTO"));
        assert_eq!(profile.get("tech"), Some("Rust"));
    }

    #[test]
    fn exchange_appends_pair_in_order() {
        let (_dir, store) = temp_store();
        let (u, a) = store.append_exchange("hi", "Hello!").unwrap();
        assert!(a > u);

        let turns = store.list_turns(10).unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[0].content, "hi");
        assert_eq!(turns[1].role, Role::Assistant);
        assert_eq!(turns[1].content, "Hello!");
    }

    #[test]
    fn recent_user_turns_newest_first_and_limited() {
        let (_dir, store) = temp_store();
        store.append_exchange("first", "r1").unwrap();
        store.append_exchange("second", "r2").unwrap();
        store.append_exchange("third", "r3").unwrap();

        assert_eq!(store.list_recent_user_turns(2).unwrap(), vec!["third", "second"]);
    }

    #[test]
    fn clear_then_list_is_empty() {
        let (_dir, store) = temp_store();
        store.append_exchange("a", "b").unwrap();
        store.append_turn(Role::User, "orphan").unwrap();

        assert_eq!(store.clear_all_turns().unwrap(), 3);
        assert!(store.list_recent_user_turns(10).unwrap().is_empty());
        assert!(store.list_turns(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn blocking_helper_runs_operations() {
        let (_dir, store) = temp_store();
        let shared: Arc<dyn ConversationStore> = Arc::new(store);
        run_blocking(&shared, |s| s.append_exchange("q", "a")).await.unwrap();
        let recent = run_blocking(&shared, |s| s.list_recent_user_turns(5)).await.unwrap();
        assert_eq!(recent, vec!["q"]);
    }

    #[test]
    fn legacy_bot_rows_read_as_assistant() {
        let (_dir, store) = temp_store();
        let conn = store.connect().unwrap();
        conn.execute("INSERT INTO history (role, content) VALUES ('bot', 'legacy')", [])
            .unwrap();
        drop(conn);

        let turns = store.list_turns(5).unwrap();
        assert_eq!(turns[0].role, Role::Assistant);
    }
}
