use bevy::prelude::*;
use crossbeam_channel::{Receiver, Sender};
use notify::{Event as NotifyEvent, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use crate::game_data::GameMakerGame;
use crate::session::PlaySession;

pub enum GameFileEvent {
    Changed(Box<GameMakerGame>),
    Invalid(String),
}

/// Watches one game file and reports parsed edits. Dropping it stops the
/// underlying watcher.
pub struct GameFileWatcher {
    path: PathBuf,
    events: Receiver<GameFileEvent>,
    _watcher: RecommendedWatcher,
}

impl GameFileWatcher {
    pub fn spawn(path: impl Into<PathBuf>) -> Result<Self, String> {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .ok_or_else(|| format!("{} is not a file path", path.display()))?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (tx, events) = crossbeam_channel::unbounded::<GameFileEvent>();
        let watched = path.clone();
        let mut last_hash = std::fs::read_to_string(&path).ok().map(|s| source_hash(&s));
        let mut watcher = notify::recommended_watcher(move |res: Result<NotifyEvent, notify::Error>| {
            let Ok(event) = res else {
                return;
            };
            if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                return;
            }
            if !event
                .paths
                .iter()
                .any(|p| p.file_name() == Some(file_name.as_os_str()))
            {
                return;
            }
            read_and_send(&watched, &mut last_hash, &tx);
        })
        .map_err(|e| format!("Failed to create watcher: {e}"))?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| format!("Failed to watch {}: {e}", dir.display()))?;

        println!("[GameQuest FileWatcher] Watching game: {}", path.display());
        Ok(Self {
            path,
            events,
            _watcher: watcher,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn try_next(&self) -> Option<GameFileEvent> {
        self.events.try_recv().ok()
    }
}

fn source_hash(source: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    source.hash(&mut hasher);
    hasher.finish()
}

/// Editors fire several events per save; identical contents are reported
/// once.
fn read_and_send(path: &Path, last_hash: &mut Option<u64>, tx: &Sender<GameFileEvent>) {
    let Ok(source) = std::fs::read_to_string(path) else {
        return;
    };
    if source.trim().is_empty() {
        return;
    }
    let hash = source_hash(&source);
    if *last_hash == Some(hash) {
        return;
    }
    *last_hash = Some(hash);
    let event = match GameMakerGame::from_json(&source) {
        Ok(game) => GameFileEvent::Changed(Box::new(game)),
        Err(e) => GameFileEvent::Invalid(e),
    };
    let _ = tx.send(event);
}

/// Hot-swaps edited node scripts into the running session.
pub struct GameFileWatcherPlugin {
    pub path: PathBuf,
}

impl Plugin for GameFileWatcherPlugin {
    fn build(&self, app: &mut App) {
        match GameFileWatcher::spawn(self.path.clone()) {
            Ok(watcher) => {
                app.insert_non_send_resource(watcher)
                    .add_systems(Update, apply_game_file_edits);
            }
            Err(e) => eprintln!("[GameQuest FileWatcher] {e}"),
        }
    }
}

fn apply_game_file_edits(watcher: NonSend<GameFileWatcher>, mut session: NonSendMut<PlaySession>) {
    while let Some(event) = watcher.try_next() {
        match event {
            GameFileEvent::Changed(game) => {
                info!(
                    "[GameQuest FileWatcher] {} changed; reloading",
                    watcher.path().display()
                );
                session.reload_game(*game);
            }
            GameFileEvent::Invalid(e) => {
                warn!("[GameQuest FileWatcher] Ignoring edit: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    /// A save can be observed half-written, so parse failures are skipped.
    fn wait_for_change(watcher: &GameFileWatcher) -> Option<Box<GameMakerGame>> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Some(GameFileEvent::Changed(game)) = watcher.try_next() {
                return Some(game);
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        None
    }

    fn game_json(title: &str) -> String {
        serde_json::json!({
            "id": "g1",
            "title": title,
            "game_data": {"nodes": [{"id": "start", "type": "startgame", "codingMode": "javascript",
                                     "javascriptCode": "let a = 1;"}]}
        })
        .to_string()
    }

    #[test]
    fn duplicate_contents_are_reported_once() {
        let dir = tempfile::tempdir().expect("tmp");
        let path = dir.path().join("game.json");
        std::fs::write(&path, game_json("v1")).expect("write");
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut last = None;

        read_and_send(&path, &mut last, &tx);
        read_and_send(&path, &mut last, &tx);
        assert!(matches!(rx.try_recv(), Ok(GameFileEvent::Changed(g)) if g.title == "v1"));
        assert!(rx.try_recv().is_err());

        std::fs::write(&path, "{ broken").expect("write");
        read_and_send(&path, &mut last, &tx);
        assert!(matches!(rx.try_recv(), Ok(GameFileEvent::Invalid(_))));
    }

    #[test]
    fn edits_to_the_watched_file_arrive_parsed() {
        let dir = tempfile::tempdir().expect("tmp");
        let path = dir.path().join("game.json");
        std::fs::write(&path, game_json("v1")).expect("write");
        let watcher = GameFileWatcher::spawn(&path).expect("watch");

        std::fs::write(&path, game_json("v2")).expect("write");
        let game = wait_for_change(&watcher).expect("no watch event");
        assert_eq!(game.title, "v2");
    }
}
