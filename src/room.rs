use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
#[cfg(test)]
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    #[default]
    Waiting,
    Playing,
    Finished,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoomPlayer {
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub is_finished: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomMiscData {
    #[serde(rename = "_shared", default, skip_serializing_if = "Option::is_none")]
    pub shared: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Platform `GameRoom` record. Unknown fields are tolerated and dropped.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomRecord {
    pub id: String,
    #[serde(default)]
    pub game_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gamemaker_game_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_email: Option<String>,
    #[serde(default)]
    pub players: Vec<RoomPlayer>,
    #[serde(default)]
    pub status: RoomStatus,
    #[serde(default)]
    pub misc_data: RoomMiscData,
}

impl RoomRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn shared_state(&self) -> Option<&serde_json::Map<String, serde_json::Value>> {
        self.misc_data.shared.as_ref()
    }
}

/// Read access to rooms on the hosting platform. `Ok(None)` means the room
/// does not exist; `Err` is a transport or decode failure.
pub trait RoomStore: Send + Sync + 'static {
    fn fetch(&self, room_id: &str) -> Result<Option<RoomRecord>, String>;
}

/// Process-local store, shared by clones, for driving room changes from tests.
#[cfg(test)]
#[derive(Clone, Default)]
pub struct InMemoryRoomStore {
    rooms: Arc<Mutex<HashMap<String, RoomRecord>>>,
}

#[cfg(test)]
impl InMemoryRoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_rooms<T>(&self, f: impl FnOnce(&mut HashMap<String, RoomRecord>) -> T) -> Result<T, String> {
        let mut rooms = self
            .rooms
            .lock()
            .map_err(|_| "room store lock poisoned".to_string())?;
        Ok(f(&mut rooms))
    }

    pub fn upsert(&self, room: RoomRecord) -> Result<(), String> {
        self.with_rooms(|rooms| {
            rooms.insert(room.id.clone(), room);
        })
    }

    pub fn remove(&self, room_id: &str) -> Result<Option<RoomRecord>, String> {
        self.with_rooms(|rooms| rooms.remove(room_id))
    }

    pub fn set_status(&self, room_id: &str, status: RoomStatus) -> Result<bool, String> {
        self.with_rooms(|rooms| match rooms.get_mut(room_id) {
            Some(room) => {
                room.status = status;
                true
            }
            None => false,
        })
    }
}

#[cfg(test)]
impl RoomStore for InMemoryRoomStore {
    fn fetch(&self, room_id: &str) -> Result<Option<RoomRecord>, String> {
        self.with_rooms(|rooms| rooms.get(room_id).cloned())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RoomFile {
    List(Vec<RoomRecord>),
    Wrapped { rooms: Vec<RoomRecord> },
    Single(Box<RoomRecord>),
}

/// Rooms kept in a JSON file (a list, `{ "rooms": [...] }`, or one record).
/// The file is re-read on every fetch so external edits show up on the next
/// poll.
pub struct FileRoomStore {
    path: PathBuf,
}

impl FileRoomStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RoomStore for FileRoomStore {
    fn fetch(&self, room_id: &str) -> Result<Option<RoomRecord>, String> {
        let source = std::fs::read_to_string(&self.path)
            .map_err(|e| format!("Failed to read {}: {e}", self.path.display()))?;
        let parsed: RoomFile = serde_json::from_str(&source)
            .map_err(|e| format!("Invalid room file {}: {e}", self.path.display()))?;
        let rooms = match parsed {
            RoomFile::List(rooms) | RoomFile::Wrapped { rooms } => rooms,
            RoomFile::Single(room) => vec![*room],
        };
        Ok(rooms.into_iter().find(|r| r.id == room_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_platform_room_shape() {
        let room: RoomRecord = serde_json::from_value(serde_json::json!({
            "id": "r1",
            "game_code": "ABCD",
            "gamemaker_game_id": "g1",
            "host_email": "host@example.com",
            "quiz_id": "ignored",
            "players": [{"email": "a@example.com", "name": "A", "score": 10, "is_finished": false}],
            "status": "playing",
            "misc_data": {"_shared": {"round": 2}, "theme": "dark"}
        }))
        .expect("room");
        assert_eq!(room.status, RoomStatus::Playing);
        assert_eq!(room.players[0].score, 10.0);
        assert_eq!(room.shared_state().and_then(|s| s.get("round")), Some(&serde_json::json!(2)));
        assert_eq!(room.misc_data.extra.get("theme"), Some(&serde_json::json!("dark")));
    }

    #[test]
    fn memory_store_updates_are_visible_to_clones() {
        let store = InMemoryRoomStore::new();
        let reader = store.clone();
        store.upsert(RoomRecord::new("r1")).expect("upsert");
        assert!(store.set_status("r1", RoomStatus::Playing).expect("status"));
        assert!(!store.set_status("missing", RoomStatus::Playing).expect("status"));
        let room = reader.fetch("r1").expect("fetch").expect("room");
        assert_eq!(room.status, RoomStatus::Playing);
        store.remove("r1").expect("remove");
        assert_eq!(reader.fetch("r1").expect("fetch"), None);
    }

    #[test]
    fn file_store_rereads_each_fetch() {
        let mut file = tempfile::NamedTempFile::new().expect("tmp");
        write!(file, r#"[{{"id": "r1", "status": "waiting"}}]"#).expect("write");
        let store = FileRoomStore::new(file.path());
        let room = store.fetch("r1").expect("fetch").expect("room");
        assert_eq!(room.status, RoomStatus::Waiting);

        std::fs::write(
            file.path(),
            r#"{"rooms": [{"id": "r1", "status": "playing", "misc_data": {"_shared": {"hp": 3}}}]}"#,
        )
        .expect("rewrite");
        let room = store.fetch("r1").expect("fetch").expect("room");
        assert_eq!(room.status, RoomStatus::Playing);
        assert!(store.fetch("other").expect("fetch").is_none());

        std::fs::write(file.path(), "not json").expect("rewrite");
        assert!(store.fetch("r1").is_err());
    }
}
