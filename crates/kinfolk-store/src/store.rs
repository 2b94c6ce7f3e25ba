use std::path::Path;

use kinfolk_core::endpoint;
use kinfolk_core::ids::NAMESPACE_BASE;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

const KEY_SERVER_URL: &str = "server_url";
// Legacy keys from before the face and PDF endpoints were unified.
const KEY_FACE_SERVER_URL: &str = "face_server_url";
const KEY_PDF_SERVER_URL: &str = "pdf_server_url";
const KEY_DEVICE_ID: &str = "device_id";

/// A family member, reduced to what face sync needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: i64,
    pub display_name: String,
    /// Reference photo used for server-side registration.
    pub photo_path: Option<String>,
}

/// One row of a member's photo gallery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoRecord {
    pub id: i64,
    pub member_id: i64,
    pub photo_path: String,
    pub added_at: i64,
}

/// SQLite-backed store. Opens (and migrates) the schema on creation.
pub struct FamilyStore {
    conn: Connection,
}

impl FamilyStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS members (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                display_name TEXT NOT NULL,
                photo_path   TEXT
            );
            CREATE TABLE IF NOT EXISTS photos (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                member_id  INTEGER NOT NULL REFERENCES members(id),
                photo_path TEXT NOT NULL,
                added_at   INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(Self { conn })
    }

    // --- settings ---

    pub fn setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = self
            .conn
            .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// The configured server URL, normalized. Falls back through the
    /// legacy per-service keys, then the default production endpoint.
    pub fn server_url(&self) -> Result<String, StoreError> {
        for key in [KEY_SERVER_URL, KEY_FACE_SERVER_URL, KEY_PDF_SERVER_URL] {
            if let Some(url) = self.setting(key)? {
                return Ok(endpoint::normalize(&url));
            }
        }
        Ok(endpoint::DEFAULT_BASE_URL.to_string())
    }

    /// Store a server URL (normalized on write, under every key so
    /// legacy readers agree). Returns the normalized form.
    pub fn set_server_url(&self, url: &str) -> Result<String, StoreError> {
        let normalized = endpoint::normalize(url);
        for key in [KEY_SERVER_URL, KEY_FACE_SERVER_URL, KEY_PDF_SERVER_URL] {
            self.set_setting(key, &normalized)?;
        }
        tracing::debug!(url = %normalized, "server url updated");
        Ok(normalized)
    }

    /// The per-install device id, generated and persisted on first use.
    ///
    /// Derived from the current time modulo one million; zero is
    /// treated as "unset", matching the sentinel used at first launch.
    pub fn device_id(&self) -> Result<i64, StoreError> {
        if let Some(value) = self.setting(KEY_DEVICE_ID)? {
            if let Ok(id) = value.parse::<i64>() {
                if id != 0 {
                    return Ok(id);
                }
            }
        }

        let id = chrono::Utc::now().timestamp_millis() % NAMESPACE_BASE;
        self.set_setting(KEY_DEVICE_ID, &id.to_string())?;
        tracing::info!(device_id = id, "generated device id");
        Ok(id)
    }

    // --- members ---

    pub fn add_member(
        &self,
        display_name: &str,
        photo_path: Option<&str>,
    ) -> Result<i64, StoreError> {
        self.conn.execute(
            "INSERT INTO members (display_name, photo_path) VALUES (?1, ?2)",
            params![display_name, photo_path],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn members(&self) -> Result<Vec<Member>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, display_name, photo_path FROM members ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(Member {
                id: row.get(0)?,
                display_name: row.get(1)?,
                photo_path: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn member(&self, id: i64) -> Result<Option<Member>, StoreError> {
        let member = self
            .conn
            .query_row(
                "SELECT id, display_name, photo_path FROM members WHERE id = ?1",
                [id],
                |row| {
                    Ok(Member {
                        id: row.get(0)?,
                        display_name: row.get(1)?,
                        photo_path: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(member)
    }

    pub fn set_member_photo(&self, id: i64, photo_path: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE members SET photo_path = ?1 WHERE id = ?2",
            params![photo_path, id],
        )?;
        Ok(())
    }

    /// Remove a member and their gallery rows. Returns whether the
    /// member existed.
    pub fn remove_member(&self, id: i64) -> Result<bool, StoreError> {
        self.conn
            .execute("DELETE FROM photos WHERE member_id = ?1", [id])?;
        let removed = self.conn.execute("DELETE FROM members WHERE id = ?1", [id])?;
        Ok(removed > 0)
    }

    // --- photos ---

    pub fn photos_for_member(&self, member_id: i64) -> Result<Vec<PhotoRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, member_id, photo_path, added_at FROM photos
             WHERE member_id = ?1 ORDER BY added_at",
        )?;
        let rows = stmt.query_map([member_id], |row| {
            Ok(PhotoRecord {
                id: row.get(0)?,
                member_id: row.get(1)?,
                photo_path: row.get(2)?,
                added_at: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn insert_photo(
        &self,
        member_id: i64,
        photo_path: &str,
        added_at: i64,
    ) -> Result<i64, StoreError> {
        self.conn.execute(
            "INSERT INTO photos (member_id, photo_path, added_at) VALUES (?1, ?2, ?3)",
            params![member_id, photo_path, added_at],
        )?;
        Ok(self.conn.last_insert_rowid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_url_defaults_and_normalizes() {
        let store = FamilyStore::open_in_memory().unwrap();
        assert_eq!(store.server_url().unwrap(), endpoint::DEFAULT_BASE_URL);

        let normalized = store.set_server_url("192.168.1.178:5000").unwrap();
        assert_eq!(normalized, "http://192.168.1.178:5000/api");
        assert_eq!(store.server_url().unwrap(), "http://192.168.1.178:5000/api");
    }

    #[test]
    fn test_server_url_falls_back_through_legacy_keys() {
        let store = FamilyStore::open_in_memory().unwrap();
        store
            .set_setting(KEY_FACE_SERVER_URL, "https://old.example.com/api")
            .unwrap();
        assert_eq!(store.server_url().unwrap(), "https://old.example.com/api");
    }

    #[test]
    fn test_device_id_is_stable() {
        let store = FamilyStore::open_in_memory().unwrap();
        let first = store.device_id().unwrap();
        assert!((0..NAMESPACE_BASE).contains(&first));
        assert_eq!(store.device_id().unwrap(), first);
    }

    #[test]
    fn test_member_round_trip() {
        let store = FamilyStore::open_in_memory().unwrap();
        let id = store.add_member("Ada Kinfolk", Some("/photos/ada.jpg")).unwrap();

        let members = store.members().unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].display_name, "Ada Kinfolk");

        let member = store.member(id).unwrap().unwrap();
        assert_eq!(member.photo_path.as_deref(), Some("/photos/ada.jpg"));

        assert!(store.remove_member(id).unwrap());
        assert!(store.member(id).unwrap().is_none());
        assert!(!store.remove_member(id).unwrap());
    }

    #[test]
    fn test_photo_rows_follow_their_member() {
        let store = FamilyStore::open_in_memory().unwrap();
        let id = store.add_member("Ada", None).unwrap();
        store.insert_photo(id, "/photos/a.jpg", 100).unwrap();
        store.insert_photo(id, "/photos/b.jpg", 200).unwrap();

        let photos = store.photos_for_member(id).unwrap();
        assert_eq!(photos.len(), 2);
        assert_eq!(photos[0].photo_path, "/photos/a.jpg");

        store.remove_member(id).unwrap();
        assert!(store.photos_for_member(id).unwrap().is_empty());
    }
}
