use bevy::log::{info, warn};
use crossbeam_channel::{select, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::events::RuntimeEventLog;
use crate::room::{RoomRecord, RoomStatus, RoomStore};
use crate::scripting::PlayState;

pub const IN_GAME_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const LOBBY_POLL_INTERVAL: Duration = Duration::from_millis(3000);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollCadence {
    InGame,
    Lobby,
    Custom(Duration),
}

impl PollCadence {
    pub fn interval(self) -> Duration {
        match self {
            Self::InGame => IN_GAME_POLL_INTERVAL,
            Self::Lobby => LOBBY_POLL_INTERVAL,
            Self::Custom(interval) => interval,
        }
    }
}

/// Result of one fetch against the room store.
#[derive(Clone, Debug, PartialEq)]
pub enum RoomUpdate {
    Found(RoomRecord),
    Missing,
    Failed(String),
}

pub fn poll_once(store: &dyn RoomStore, room_id: &str) -> RoomUpdate {
    match store.fetch(room_id) {
        Ok(Some(room)) => RoomUpdate::Found(room),
        Ok(None) => RoomUpdate::Missing,
        Err(e) => RoomUpdate::Failed(e),
    }
}

/// Background fetch loop for one room. Snapshots travel to the frame thread
/// over a channel; nothing here touches session state.
pub struct RoomPoller {
    room_id: String,
    updates: Receiver<RoomUpdate>,
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl RoomPoller {
    pub fn spawn(store: Arc<dyn RoomStore>, room_id: impl Into<String>, cadence: PollCadence) -> Self {
        let room_id = room_id.into();
        let (update_tx, updates) = crossbeam_channel::unbounded();
        let (shutdown, shutdown_rx) = crossbeam_channel::bounded::<()>(0);
        let thread_room = room_id.clone();
        let interval = cadence.interval();
        let handle = std::thread::Builder::new()
            .name(format!("room-poll-{room_id}"))
            .spawn(move || {
                let ticker = crossbeam_channel::tick(interval);
                loop {
                    if update_tx.send(poll_once(&*store, &thread_room)).is_err() {
                        break;
                    }
                    select! {
                        recv(shutdown_rx) -> _ => break,
                        recv(ticker) -> _ => {}
                    }
                }
            });
        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("[GameQuest sync] Failed to start room poller for {room_id}: {e}");
                None
            }
        };
        Self {
            room_id,
            updates,
            shutdown: Some(shutdown),
            handle,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Drains queued results and keeps only the newest.
    pub fn latest(&self) -> Option<RoomUpdate> {
        self.updates.try_iter().last()
    }

    /// Cancels the loop and waits for the thread. Idempotent.
    pub fn stop(&mut self) {
        self.shutdown.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("[GameQuest sync] Room poller for {} panicked", self.room_id);
            }
        }
    }
}

impl Drop for RoomPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Folds room snapshots into the session. Last poll wins; a missing room or
/// a failed fetch leaves the previous state in place.
#[derive(Default)]
pub struct RoomReconciler {
    room: Option<RoomRecord>,
    failures: u64,
    missing: bool,
}

impl RoomReconciler {
    pub fn room(&self) -> Option<&RoomRecord> {
        self.room.as_ref()
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Returns the new status when this update changed it.
    pub fn apply(
        &mut self,
        update: RoomUpdate,
        state: &mut PlayState,
        events: &mut RuntimeEventLog,
    ) -> Option<RoomStatus> {
        match update {
            RoomUpdate::Found(room) => {
                if self.missing {
                    info!("[GameQuest sync] Room {} is reachable again", room.id);
                    self.missing = false;
                }
                if let Some(shared) = room.shared_state() {
                    state.merge_shared(shared);
                }
                let previous = self.room.as_ref().map(|r| r.status);
                let changed = previous != Some(room.status);
                if changed {
                    events.emit(
                        "room_status",
                        serde_json::json!({
                            "room_id": room.id,
                            "from": previous,
                            "to": room.status,
                        }),
                        None,
                    );
                }
                let status = room.status;
                self.room = Some(room);
                changed.then_some(status)
            }
            RoomUpdate::Missing => {
                if !self.missing {
                    warn!("[GameQuest sync] Room not found; keeping last known state");
                    events.emit("room_unavailable", serde_json::Value::Null, None);
                    self.missing = true;
                }
                None
            }
            RoomUpdate::Failed(e) => {
                self.failures += 1;
                warn!("[GameQuest sync] Room poll failed ({} so far): {e}", self.failures);
                None
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum LobbyOutcome {
    Started(RoomRecord),
    Finished(RoomRecord),
    Missing,
    Cancelled,
}

/// Blocks until the host starts the room. Fetch failures are logged and
/// retried on the next beat.
pub fn wait_for_start(
    store: &dyn RoomStore,
    room_id: &str,
    interval: Duration,
    cancel: &Receiver<()>,
) -> LobbyOutcome {
    let ticker = crossbeam_channel::tick(interval);
    let mut last_players = None;
    loop {
        match poll_once(store, room_id) {
            RoomUpdate::Found(room) => match room.status {
                RoomStatus::Playing => return LobbyOutcome::Started(room),
                RoomStatus::Finished => return LobbyOutcome::Finished(room),
                RoomStatus::Waiting => {
                    if last_players != Some(room.players.len()) {
                        last_players = Some(room.players.len());
                        info!(
                            "[GameQuest lobby] Room {} ({}) waiting with {} player(s)",
                            room.id,
                            room.game_code,
                            room.players.len()
                        );
                    }
                }
            },
            RoomUpdate::Missing => return LobbyOutcome::Missing,
            RoomUpdate::Failed(e) => warn!("[GameQuest lobby] Poll failed: {e}"),
        }
        select! {
            recv(cancel) -> _ => return LobbyOutcome::Cancelled,
            recv(ticker) -> _ => {}
        }
    }
}
