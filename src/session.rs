use bevy::log::{info, warn};
use bevy::utils::Instant;
use serde::{Deserialize, Serialize};
use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;
use std::sync::Arc;

use crate::assets::SpriteRegistry;
use crate::canvas::{render_sprites, Canvas2d, CanvasDescriptor};
use crate::events::RuntimeEventLog;
use crate::game_data::{GameMakerGame, GameNode};
use crate::input::{InputChannel, InputSink};
use crate::room::{RoomRecord, RoomStatus, RoomStore};
use crate::scripting::{PlayState, ScriptBindings, ScriptErrors, ScriptSandbox, SharedPlayState};
use crate::sync::{PollCadence, RoomPoller, RoomReconciler, RoomUpdate};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Running,
    Stopped,
}

/// What one tick did, for hosts that react to it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TickReport {
    pub frame: u64,
    pub sprites_drawn: usize,
    pub script_ran: bool,
    pub script_failed: bool,
    pub room_status: Option<RoomStatus>,
}

struct MultiplayerLink {
    store: Arc<dyn RoomStore>,
    room_id: String,
    cadence: PollCadence,
}

/// One play or playtest run of a game.
///
/// Owns the entity store, globals, input channel, sandbox, event log and
/// the optional room poller. Everything is torn down by [`PlaySession::stop`],
/// which also runs on drop.
pub struct PlaySession {
    game: GameMakerGame,
    sprites: SpriteRegistry,
    state: SharedPlayState,
    canvas: Rc<RefCell<Canvas2d>>,
    sandbox: ScriptSandbox,
    bindings: ScriptBindings,
    input: InputChannel,
    events: RuntimeEventLog,
    status: SessionStatus,
    current_node: Option<usize>,
    frame: u64,
    multiplayer: Option<MultiplayerLink>,
    poller: Option<RoomPoller>,
    reconciler: RoomReconciler,
}

impl PlaySession {
    pub fn new(game: GameMakerGame) -> Self {
        let state: SharedPlayState = Rc::new(RefCell::new(PlayState::default()));
        let canvas = Rc::new(RefCell::new(Canvas2d::new(CanvasDescriptor::default())));
        Self {
            sprites: SpriteRegistry::from_assets(&game.game_data.shared_assets),
            game,
            bindings: ScriptBindings::new(state.clone(), canvas.clone()),
            state,
            canvas,
            sandbox: ScriptSandbox::new(),
            input: InputChannel::default(),
            events: RuntimeEventLog::default(),
            status: SessionStatus::Idle,
            current_node: None,
            frame: 0,
            multiplayer: None,
            poller: None,
            reconciler: RoomReconciler::default(),
        }
    }

    /// Mirrors the room's shared state into globals while running.
    pub fn with_room(
        mut self,
        store: Arc<dyn RoomStore>,
        room_id: impl Into<String>,
        cadence: PollCadence,
    ) -> Self {
        self.multiplayer = Some(MultiplayerLink {
            store,
            room_id: room_id.into(),
            cadence,
        });
        self
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn game(&self) -> &GameMakerGame {
        &self.game
    }

    pub fn current_node(&self) -> Option<&GameNode> {
        self.current_node.and_then(|i| self.game.game_data.nodes.get(i))
    }

    pub fn state(&self) -> Ref<'_, PlayState> {
        self.state.borrow()
    }

    pub fn state_mut(&self) -> RefMut<'_, PlayState> {
        self.state.borrow_mut()
    }

    pub fn canvas(&self) -> Ref<'_, Canvas2d> {
        self.canvas.borrow()
    }

    pub fn sprites(&self) -> &SpriteRegistry {
        &self.sprites
    }

    pub fn script_errors(&self) -> &ScriptErrors {
        self.sandbox.errors()
    }

    pub fn events(&self) -> &RuntimeEventLog {
        &self.events
    }

    pub fn room(&self) -> Option<&RoomRecord> {
        self.reconciler.room()
    }

    pub fn room_id(&self) -> Option<&str> {
        self.multiplayer.as_ref().map(|m| m.room_id.as_str())
    }

    /// True while the room poller thread is alive.
    pub fn is_polling(&self) -> bool {
        self.poller.as_ref().is_some_and(RoomPoller::is_running)
    }

    pub fn input_sink(&self) -> InputSink {
        self.input.sink()
    }

    /// Idle → Running. Needs an entry node; without one the session stays
    /// Idle.
    pub fn start(&mut self, surface: CanvasDescriptor) -> Result<(), String> {
        match self.status {
            SessionStatus::Idle => {}
            SessionStatus::Running => return Err("session is already running".to_string()),
            SessionStatus::Stopped => return Err("session has been stopped".to_string()),
        }
        let start = self
            .game
            .game_data
            .start_node_index()
            .ok_or_else(|| format!("game '{}' has no nodes to start from", self.game.title))?;

        self.canvas.borrow_mut().resize(surface);
        self.current_node = Some(start);
        if let Some(link) = &self.multiplayer {
            self.poller = Some(RoomPoller::spawn(
                link.store.clone(),
                link.room_id.clone(),
                link.cadence,
            ));
        }
        self.status = SessionStatus::Running;

        let node_id = self.game.game_data.nodes[start].id.clone();
        info!(
            "[GameQuest session] Started '{}' at node {node_id} ({}x{})",
            self.game.title, surface.width, surface.height
        );
        let data = serde_json::json!({ "game_id": self.game.id, "room_id": self.room_id() });
        self.events.emit("session_started", data, Some(&node_id));
        Ok(())
    }

    /// One frame: latch input, clear, draw sprites, run the node body,
    /// then fold in the newest room poll. Navigation and broadcasts the
    /// script requested take effect after the frame.
    pub fn tick(&mut self, now: Instant) -> TickReport {
        if self.status != SessionStatus::Running {
            return TickReport {
                frame: self.frame,
                ..TickReport::default()
            };
        }
        self.frame += 1;
        self.events.frame = self.frame;
        let mut report = TickReport {
            frame: self.frame,
            ..TickReport::default()
        };

        self.state.borrow_mut().input = self.input.latch(now);

        {
            let mut canvas = self.canvas.borrow_mut();
            let surface = canvas.descriptor();
            // clear the whole surface whatever transform the last frame left behind
            canvas.save();
            canvas.reset_transform();
            canvas.clear_rect(0.0, 0.0, surface.width, surface.height);
            canvas.restore();
            report.sprites_drawn =
                render_sprites(&mut canvas, &self.state.borrow().entities, &self.sprites);
        }

        let run_script = {
            let mut state = self.state.borrow_mut();
            if !state.paused {
                true
            } else if state.step_requested {
                state.step_requested = false;
                true
            } else {
                false
            }
        };
        if run_script {
            if let Some(node) = self.current_node.and_then(|i| self.game.game_data.nodes.get(i)) {
                if let Some(body) = node.script_body() {
                    report.script_ran = true;
                    report.script_failed = self
                        .sandbox
                        .run(self.frame, &node.id, body, &self.bindings)
                        .is_err();
                }
            }
        }

        if let Some(update) = self.poller.as_ref().and_then(RoomPoller::latest) {
            report.room_status = self.reconcile(update);
        }

        self.apply_script_requests();
        report
    }

    fn reconcile(&mut self, update: RoomUpdate) -> Option<RoomStatus> {
        let status = self
            .reconciler
            .apply(update, &mut self.state.borrow_mut(), &mut self.events);
        if status == Some(RoomStatus::Finished) {
            info!("[GameQuest session] Room finished at frame {}", self.frame);
        }
        status
    }

    fn apply_script_requests(&mut self) {
        let (pending, broadcasts) = {
            let mut state = self.state.borrow_mut();
            (state.pending_node.take(), std::mem::take(&mut state.broadcasts))
        };
        let from = self.current_node().map(|n| n.id.clone());
        for broadcast in broadcasts {
            self.events.emit(
                "broadcast",
                serde_json::json!({ "from": from, "message": broadcast.message }),
                Some(&broadcast.node_id),
            );
        }
        if let Some(node_id) = pending {
            if let Err(e) = self.go_to_node(&node_id) {
                warn!("[GameQuest session] {e}");
            }
        }
    }

    /// Switches the node whose body runs each frame. Entities and globals
    /// carry over.
    pub fn go_to_node(&mut self, node_id: &str) -> Result<(), String> {
        if self.status == SessionStatus::Stopped {
            return Err("session has been stopped".to_string());
        }
        let index = self
            .game
            .game_data
            .node_index(node_id)
            .ok_or_else(|| format!("goToNode: no node with id '{node_id}'"))?;
        let from = self.current_node().map(|n| n.id.clone());
        self.current_node = Some(index);
        self.events.emit(
            "node_changed",
            serde_json::json!({ "from": from, "to": node_id }),
            Some(node_id),
        );
        Ok(())
    }

    pub fn pause(&mut self) {
        self.state.borrow_mut().paused = true;
    }

    pub fn resume(&mut self) {
        let mut state = self.state.borrow_mut();
        state.paused = false;
        state.step_requested = false;
    }

    /// Pauses, and lets exactly one script frame run on the next tick.
    pub fn step(&mut self) {
        let mut state = self.state.borrow_mut();
        state.paused = true;
        state.step_requested = true;
    }

    pub fn is_paused(&self) -> bool {
        self.state.borrow().paused
    }

    /// Swaps in an edited copy of the game. Entities and globals are kept;
    /// the current node is kept when it still exists.
    pub fn reload_game(&mut self, game: GameMakerGame) {
        let current_id = self.current_node().map(|n| n.id.clone());
        for node in &self.game.game_data.nodes {
            self.sandbox.forget(&node.id);
        }
        self.sprites = SpriteRegistry::from_assets(&game.game_data.shared_assets);
        self.game = game;
        if self.status == SessionStatus::Running {
            self.current_node = current_id
                .as_deref()
                .and_then(|id| self.game.game_data.node_index(id))
                .or_else(|| self.game.game_data.start_node_index());
        }
        info!(
            "[GameQuest session] Reloaded '{}' ({} nodes)",
            self.game.title,
            self.game.game_data.nodes.len()
        );
        let current = self.current_node().map(|n| n.id.clone());
        self.events.emit(
            "game_reloaded",
            serde_json::json!({ "nodes": self.game.game_data.nodes.len() }),
            current.as_deref(),
        );
    }

    /// Cancels polling and closes input. Safe to call more than once.
    pub fn stop(&mut self) {
        if self.status == SessionStatus::Stopped {
            return;
        }
        if let Some(mut poller) = self.poller.take() {
            poller.stop();
        }
        self.input.close();
        self.status = SessionStatus::Stopped;
        info!("[GameQuest session] Stopped after {} frames", self.frame);
        self.events.emit(
            "session_stopped",
            serde_json::json!({ "frames": self.frame }),
            None,
        );
    }
}

impl Drop for PlaySession {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{AssetKind, AssetRef};
    use crate::canvas::DrawCommand;
    use crate::game_data::{CodingMode, GameData, START_NODE_TYPE};
    use crate::input::InputEvent;
    use crate::room::InMemoryRoomStore;
    use std::time::Duration;

    fn node(id: &str, node_type: &str, code: &str) -> GameNode {
        GameNode {
            id: id.to_string(),
            node_type: node_type.to_string(),
            x: 0.0,
            y: 0.0,
            label: id.to_string(),
            javascript_code: Some(code.to_string()),
            blockly_xml: None,
            coding_mode: CodingMode::Javascript,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    fn game(nodes: Vec<GameNode>) -> GameMakerGame {
        GameMakerGame {
            id: "g".into(),
            title: "Test".into(),
            game_data: GameData {
                nodes,
                connections: Vec::new(),
                shared_assets: vec![AssetRef {
                    kind: AssetKind::Sprite,
                    name: "hero".into(),
                    url: "hero.png".into(),
                    size: 0,
                }],
            },
        }
    }

    fn running(nodes: Vec<GameNode>) -> PlaySession {
        let mut session = PlaySession::new(game(nodes));
        session.start(CanvasDescriptor::default()).expect("start");
        session
    }

    fn global(session: &PlaySession, key: &str) -> Option<serde_json::Value> {
        session.state().global_json(key)
    }

    #[test]
    fn start_without_nodes_stays_idle() {
        let mut session = PlaySession::new(game(Vec::new()));
        assert!(session.start(CanvasDescriptor::default()).is_err());
        assert_eq!(session.status(), SessionStatus::Idle);
        assert_eq!(session.tick(Instant::now()).frame, 0);
    }

    #[test]
    fn start_picks_the_entry_node() {
        let session = running(vec![
            node("intro", "scene", ""),
            node("main", START_NODE_TYPE, "let a = 1;"),
        ]);
        assert_eq!(session.status(), SessionStatus::Running);
        assert_eq!(session.current_node().map(|n| n.id.as_str()), Some("main"));
    }

    #[test]
    fn sprites_draw_before_the_script() {
        let mut session = running(vec![node(
            "main",
            START_NODE_TYPE,
            r#"
            if type_of(game.getSprite("p")) == "()" { game.createSprite("p", "hero", 10, 10); }
            ctx.fillRect(0, 0, 5, 5);
            "#,
        )]);
        let first = session.tick(Instant::now());
        assert_eq!(first.sprites_drawn, 0);
        let second = session.tick(Instant::now());
        assert_eq!(second.sprites_drawn, 1);
        let canvas = session.canvas();
        let kinds: Vec<&str> = canvas
            .commands()
            .iter()
            .map(|c| match c {
                DrawCommand::Image { .. } => "image",
                DrawCommand::FillRect { .. } => "rect",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["image", "rect"]);
    }

    #[test]
    fn scripts_see_the_latched_input() {
        let mut session = running(vec![node(
            "main",
            START_NODE_TYPE,
            r#"game.setGlobal("left", game.isKeyPressed("ArrowLeft"));"#,
        )]);
        let sink = session.input_sink();
        sink.send(InputEvent::KeyDown {
            key: "ArrowLeft".into(),
        });
        session.tick(Instant::now());
        assert_eq!(global(&session, "left"), Some(serde_json::json!(true)));
        sink.send(InputEvent::KeyUp {
            key: "ArrowLeft".into(),
        });
        session.tick(Instant::now());
        assert_eq!(global(&session, "left"), Some(serde_json::json!(false)));
    }

    #[test]
    fn room_poll_wins_over_same_frame_script_write() {
        let store = InMemoryRoomStore::new();
        let mut room = RoomRecord::new("r1");
        room.status = RoomStatus::Playing;
        room.misc_data.shared = serde_json::json!({"score": 99}).as_object().cloned();
        store.upsert(room).expect("upsert");

        let mut session = PlaySession::new(game(vec![node(
            "main",
            START_NODE_TYPE,
            r#"game.setGlobal("score", 10);"#,
        )]))
        .with_room(
            Arc::new(store),
            "r1",
            PollCadence::Custom(Duration::from_millis(5)),
        );
        session.start(CanvasDescriptor::default()).expect("start");

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        let mut merged = false;
        while std::time::Instant::now() < deadline {
            let report = session.tick(Instant::now());
            if report.room_status.is_some() || session.room().is_some() {
                merged = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(merged, "no room poll arrived");
        assert_eq!(global(&session, "score"), Some(serde_json::json!(99)));
        assert_eq!(session.room().map(|r| r.status), Some(RoomStatus::Playing));
    }

    #[test]
    fn stop_tears_everything_down_once() {
        let store = InMemoryRoomStore::new();
        store.upsert(RoomRecord::new("r1")).expect("upsert");
        let mut session = PlaySession::new(game(vec![node("main", START_NODE_TYPE, "")]))
            .with_room(Arc::new(store), "r1", PollCadence::InGame);
        session.start(CanvasDescriptor::default()).expect("start");
        let sink = session.input_sink();
        assert!(session.is_polling());

        session.stop();
        session.stop();
        assert_eq!(session.status(), SessionStatus::Stopped);
        assert!(session.poller.is_none());
        assert!(!session.is_polling());
        assert!(!sink.send(InputEvent::MouseDown));
        assert_eq!(session.events().named("session_stopped").count(), 1);
        assert_eq!(session.tick(Instant::now()).frame, 0);
        assert!(session.start(CanvasDescriptor::default()).is_err());
    }

    #[test]
    fn dropping_a_session_closes_input() {
        let session = running(vec![node("main", START_NODE_TYPE, "")]);
        let sink = session.input_sink();
        drop(session);
        assert!(!sink.is_open());
    }

    #[test]
    fn paused_sessions_render_but_skip_scripts_until_step() {
        let mut session = running(vec![node(
            "main",
            START_NODE_TYPE,
            r#"
            let n = game.getGlobal("n");
            if type_of(n) == "()" { n = 0; }
            game.setGlobal("n", n + 1);
            "#,
        )]);
        session.tick(Instant::now());
        session.pause();
        assert!(!session.tick(Instant::now()).script_ran);
        assert!(!session.tick(Instant::now()).script_ran);
        assert_eq!(global(&session, "n"), Some(serde_json::json!(1)));

        session.step();
        assert!(session.tick(Instant::now()).script_ran);
        assert!(!session.tick(Instant::now()).script_ran);
        assert_eq!(global(&session, "n"), Some(serde_json::json!(2)));
        assert!(session.is_paused());

        session.resume();
        session.tick(Instant::now());
        assert_eq!(global(&session, "n"), Some(serde_json::json!(3)));
    }

    #[test]
    fn go_to_node_and_broadcast_apply_after_the_frame() {
        let mut session = running(vec![
            node(
                "menu",
                START_NODE_TYPE,
                r#"
                game.broadcastToNode("hud", "hello");
                game.goToNode("level");
                game.setGlobal("menu_ran", true);
                "#,
            ),
            node("level", "scene", r#"game.setGlobal("level_ran", true);"#),
        ]);
        session.tick(Instant::now());
        assert_eq!(session.current_node().map(|n| n.id.as_str()), Some("level"));
        assert_eq!(global(&session, "level_ran"), None);
        let broadcast = session.events().named("broadcast").next().cloned().expect("broadcast");
        assert_eq!(broadcast.node_id.as_deref(), Some("hud"));
        assert_eq!(broadcast.data["message"], "hello");

        session.tick(Instant::now());
        assert_eq!(global(&session, "level_ran"), Some(serde_json::json!(true)));
        assert!(session.go_to_node("nowhere").is_err());
        assert_eq!(session.current_node().map(|n| n.id.as_str()), Some("level"));
    }

    #[test]
    fn faulty_scripts_do_not_stop_the_loop() {
        let mut session = running(vec![node(
            "main",
            START_NODE_TYPE,
            r#"game.setGlobal("t", 1); undefined_fn();"#,
        )]);
        for _ in 0..3 {
            assert!(session.tick(Instant::now()).script_failed);
        }
        assert_eq!(session.frame(), 3);
        assert_eq!(session.script_errors().len(), 3);
        assert_eq!(global(&session, "t"), Some(serde_json::json!(1)));
    }

    #[test]
    fn blockly_nodes_drive_nothing() {
        let mut blocks = node("main", START_NODE_TYPE, "game.setGlobal(\"x\", 1);");
        blocks.coding_mode = CodingMode::Blockly;
        let mut session = running(vec![blocks]);
        assert!(!session.tick(Instant::now()).script_ran);
        assert!(session.script_errors().is_empty());
    }

    #[test]
    fn reload_keeps_entities_and_swaps_scripts() {
        let mut session = running(vec![node(
            "main",
            START_NODE_TYPE,
            r#"if type_of(game.getSprite("p")) == "()" { game.createSprite("p", "hero", 0, 0); }"#,
        )]);
        session.tick(Instant::now());
        session.reload_game(game(vec![node(
            "main",
            START_NODE_TYPE,
            r#"game.moveSprite("p", 5, 0);"#,
        )]));
        session.tick(Instant::now());
        let state = session.state();
        let p = state.entities.get(&"p".into()).expect("p");
        assert_eq!(p.x, 5.0);
        assert_eq!(state.entities.len(), 1);
    }
}
