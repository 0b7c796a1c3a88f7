use bevy::input::keyboard::{Key, KeyboardInput};
use bevy::input::mouse::MouseButtonInput;
use bevy::input::ButtonState;
use bevy::prelude::*;
use bevy::utils::Instant;
use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How long a mouse press keeps `isMouseClicked()` true.
pub const CLICK_PULSE: Duration = Duration::from_millis(100);

/// Host-side input event. Key names follow DOM `KeyboardEvent.key`
/// (`"ArrowLeft"`, `"a"`, `" "`), mouse positions are canvas pixels.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputEvent {
    KeyDown { key: String },
    KeyUp { key: String },
    MouseMove { x: f64, y: f64 },
    MouseDown,
}

/// Frozen view handed to scripts for one tick.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct InputSnapshot {
    pub keys: BTreeSet<String>,
    pub mouse_x: f64,
    pub mouse_y: f64,
    pub mouse_clicked: bool,
}

impl InputSnapshot {
    pub fn is_key_pressed(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn mouse_pos(&self) -> (f64, f64) {
        (self.mouse_x, self.mouse_y)
    }

    pub fn is_mouse_clicked(&self) -> bool {
        self.mouse_clicked
    }
}

#[derive(Default)]
struct LiveInput {
    keys: BTreeSet<String>,
    mouse: (f64, f64),
    click_until: Option<Instant>,
}

impl LiveInput {
    fn apply(&mut self, event: InputEvent, received_at: Instant) {
        match event {
            InputEvent::KeyDown { key } => {
                self.keys.insert(key);
            }
            InputEvent::KeyUp { key } => {
                self.keys.remove(&key);
            }
            InputEvent::MouseMove { x, y } => self.mouse = (x, y),
            InputEvent::MouseDown => self.click_until = Some(received_at + CLICK_PULSE),
        }
    }
}

/// Clonable handle a host uses to push events into a session. Once the
/// session closes its channel, `send` returns `false` and the host should
/// drop its subscription.
#[derive(Clone)]
pub struct InputSink {
    sender: Sender<(InputEvent, Instant)>,
    open: Arc<AtomicBool>,
}

impl InputSink {
    pub fn send(&self, event: InputEvent) -> bool {
        self.send_at(event, Instant::now())
    }

    pub fn send_at(&self, event: InputEvent, at: Instant) -> bool {
        if !self.is_open() {
            return false;
        }
        self.sender.send((event, at)).is_ok()
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

/// Session-owned end of the input stream. Events queue up between ticks and
/// are folded into live state only when the next tick latches, so a script
/// never sees input change mid-tick.
pub struct InputChannel {
    sender: Sender<(InputEvent, Instant)>,
    receiver: Receiver<(InputEvent, Instant)>,
    open: Arc<AtomicBool>,
    live: LiveInput,
}

impl Default for InputChannel {
    fn default() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self {
            sender,
            receiver,
            open: Arc::new(AtomicBool::new(true)),
            live: LiveInput::default(),
        }
    }
}

impl InputChannel {
    pub fn sink(&self) -> InputSink {
        InputSink {
            sender: self.sender.clone(),
            open: self.open.clone(),
        }
    }

    pub fn latch(&mut self, now: Instant) -> InputSnapshot {
        for (event, at) in self.receiver.try_iter() {
            self.live.apply(event, at);
        }
        InputSnapshot {
            keys: self.live.keys.clone(),
            mouse_x: self.live.mouse.0,
            mouse_y: self.live.mouse.1,
            mouse_clicked: self.live.click_until.is_some_and(|until| now < until),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Releases every sink and forgets held keys.
    pub fn close(&mut self) {
        self.open.store(false, Ordering::Release);
        while self.receiver.try_recv().is_ok() {}
        self.live = LiveInput::default();
    }
}

/// Sink the windowed host forwards into. Cleared once the session closes it.
#[derive(Resource, Default)]
pub struct HostInputSink(pub Option<InputSink>);

/// Forwards window keyboard/mouse events into the play session.
pub struct HostInputPlugin;

impl Plugin for HostInputPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<HostInputSink>()
            .add_systems(PreUpdate, forward_window_input);
    }
}

fn forward_window_input(
    mut sink: ResMut<HostInputSink>,
    mut keys: EventReader<KeyboardInput>,
    mut cursor: EventReader<CursorMoved>,
    mut buttons: EventReader<MouseButtonInput>,
) {
    let Some(active) = sink.0.as_ref() else {
        keys.clear();
        cursor.clear();
        buttons.clear();
        return;
    };

    let mut events = Vec::new();
    for ev in keys.read() {
        let Some(key) = dom_key_name(&ev.logical_key) else {
            continue;
        };
        events.push(match ev.state {
            ButtonState::Pressed => InputEvent::KeyDown { key },
            ButtonState::Released => InputEvent::KeyUp { key },
        });
    }
    for ev in cursor.read() {
        events.push(InputEvent::MouseMove {
            x: ev.position.x as f64,
            y: ev.position.y as f64,
        });
    }
    for ev in buttons.read() {
        if ev.state == ButtonState::Pressed {
            events.push(InputEvent::MouseDown);
        }
    }

    for event in events {
        if !active.send(event) {
            info!("[GameQuest input] Session closed its input channel; releasing host subscription");
            sink.0 = None;
            break;
        }
    }
}

pub fn dom_key_name(key: &Key) -> Option<String> {
    match key {
        Key::Character(s) => Some(s.to_string()),
        Key::Space => Some(" ".to_string()),
        Key::Dead(_) | Key::Unidentified(_) => None,
        named => Some(format!("{named:?}")),
    }
}
