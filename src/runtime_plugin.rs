use bevy::prelude::*;
use bevy::utils::Instant;

use crate::canvas::{CanvasDescriptor, DrawCommand};
use crate::input::HostInputSink;
use crate::room::RoomStatus;
use crate::session::{PlaySession, SessionStatus};

pub const DEFAULT_TICK_HZ: f64 = 60.0;

/// Draw commands recorded by the most recent tick. The presenter replays
/// these; headless hosts can ignore them.
#[derive(Resource, Default, Debug)]
pub struct FrameCommands {
    pub frame: u64,
    pub commands: Vec<DrawCommand>,
}

#[derive(Resource, Clone, Copy, Debug)]
pub struct PlaySurface(pub CanvasDescriptor);

/// Drives a [`PlaySession`] from the bevy schedule.
///
/// The session itself must be inserted with `insert_non_send_resource`
/// before the app runs: it holds the script engine, which never leaves the
/// main thread.
pub struct PlayRuntimePlugin {
    pub surface: CanvasDescriptor,
    pub tick_hz: f64,
}

impl Default for PlayRuntimePlugin {
    fn default() -> Self {
        Self {
            surface: CanvasDescriptor::default(),
            tick_hz: DEFAULT_TICK_HZ,
        }
    }
}

impl Plugin for PlayRuntimePlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(PlaySurface(self.surface))
            .insert_resource(Time::<Fixed>::from_hz(self.tick_hz))
            .init_resource::<FrameCommands>()
            .init_resource::<HostInputSink>()
            .add_systems(Startup, start_session)
            .add_systems(FixedUpdate, tick_session)
            .add_systems(Last, stop_session_on_exit);
    }
}

fn start_session(
    mut session: NonSendMut<PlaySession>,
    surface: Res<PlaySurface>,
    mut host_input: ResMut<HostInputSink>,
    mut exit: EventWriter<AppExit>,
) {
    if session.status() != SessionStatus::Idle {
        return;
    }
    match session.start(surface.0) {
        Ok(()) => host_input.0 = Some(session.input_sink()),
        Err(e) => {
            error!("[GameQuest runtime] Could not start session: {e}");
            exit.send(AppExit::error());
        }
    }
}

fn tick_session(
    mut session: NonSendMut<PlaySession>,
    mut frame: ResMut<FrameCommands>,
    mut exit: EventWriter<AppExit>,
    mut exit_requested: Local<bool>,
) {
    if session.status() == SessionStatus::Stopped {
        if !*exit_requested {
            *exit_requested = true;
            info!("[GameQuest runtime] Session stopped; shutting down");
            exit.send(AppExit::Success);
        }
        return;
    }

    let report = session.tick(Instant::now());
    if report.frame != frame.frame {
        frame.frame = report.frame;
        frame.commands.clear();
        frame.commands.extend_from_slice(session.canvas().commands());
    }

    if report.room_status == Some(RoomStatus::Finished) && !*exit_requested {
        *exit_requested = true;
        info!("[GameQuest runtime] Room finished; leaving the game");
        exit.send(AppExit::Success);
    }
}

fn stop_session_on_exit(mut session: NonSendMut<PlaySession>, mut exits: EventReader<AppExit>) {
    if exits.read().last().is_some() {
        session.stop();
    }
}
