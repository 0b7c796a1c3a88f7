use bevy::prelude::*;
use crossbeam_channel::Receiver;
use tokio::sync::oneshot::Sender;

use super::types::{SessionControl, SessionInfo};
use crate::entity::{Entity, EntityKey};
use crate::events::RuntimeEvent;
use crate::input::InputEvent;
use crate::room::RoomRecord;
use crate::scripting::api::json_to_dynamic;
use crate::scripting::ScriptError;
use crate::session::PlaySession;

type JsonMap = serde_json::Map<String, serde_json::Value>;

/// Commands sent from API -> frame thread
pub enum ApiCommand {
    GetSession(Sender<SessionInfo>),
    ListEntities(Sender<Vec<Entity>>),
    GetEntity(String, Sender<Option<Entity>>),
    GetGlobals(Sender<JsonMap>),
    SetGlobals(JsonMap, Sender<Result<JsonMap, String>>),
    SendInput(InputEvent, Sender<Result<(), String>>),
    GoToNode(String, Sender<Result<SessionInfo, String>>),
    Control(SessionControl, Sender<Result<SessionInfo, String>>),
    GetScriptErrors(Sender<Vec<ScriptError>>),
    GetEvents(u64, Sender<Vec<RuntimeEvent>>),
    GetRoom(Sender<Option<RoomRecord>>),
}

#[derive(Resource)]
pub struct ApiChannels {
    pub receiver: Receiver<ApiCommand>,
}

pub(super) fn process_api_commands(channels: Res<ApiChannels>, mut session: NonSendMut<PlaySession>) {
    while let Ok(cmd) = channels.receiver.try_recv() {
        handle_command(&mut session, cmd);
    }
}

pub fn session_info(session: &PlaySession) -> SessionInfo {
    let state = session.state();
    SessionInfo {
        status: session.status(),
        frame: session.frame(),
        game_id: session.game().id.clone(),
        title: session.game().title.clone(),
        current_node: session.current_node().map(|n| n.id.clone()),
        paused: session.is_paused(),
        room_id: session.room_id().map(str::to_string),
        room_polling: session.is_polling(),
        entity_count: state.entities.len(),
        script_errors: session.script_errors().len(),
        script_errors_total: session.script_errors().total(),
        event_count: session.events().len(),
    }
}

/// Numeric path ids try the integer sprite id first, then the text one.
fn find_entity(session: &PlaySession, raw_id: &str) -> Option<Entity> {
    let state = session.state();
    let numeric = raw_id.parse::<i64>().ok().map(EntityKey::Int);
    let found = numeric
        .into_iter()
        .chain(std::iter::once(EntityKey::from(raw_id)))
        .find_map(|key| state.entities.get(&key).cloned());
    found
}

/// Replies are best effort: a caller that gave up has dropped its receiver.
pub fn handle_command(session: &mut PlaySession, cmd: ApiCommand) {
    match cmd {
        ApiCommand::GetSession(tx) => {
            let _ = tx.send(session_info(session));
        }
        ApiCommand::ListEntities(tx) => {
            let entities = session.state().entities.iter().cloned().collect();
            let _ = tx.send(entities);
        }
        ApiCommand::GetEntity(id, tx) => {
            let _ = tx.send(find_entity(session, &id));
        }
        ApiCommand::GetGlobals(tx) => {
            let _ = tx.send(session.state().globals_json());
        }
        ApiCommand::SetGlobals(values, tx) => {
            let globals = {
                let mut state = session.state_mut();
                for (key, value) in &values {
                    state.set_global(key.clone(), json_to_dynamic(value));
                }
                state.globals_json()
            };
            info!("[GameQuest API] Set {} global(s)", values.len());
            let _ = tx.send(Ok(globals));
        }
        ApiCommand::SendInput(event, tx) => {
            let result = if session.input_sink().send(event) {
                Ok(())
            } else {
                Err("Session input is closed".to_string())
            };
            let _ = tx.send(result);
        }
        ApiCommand::GoToNode(node_id, tx) => {
            let result = session.go_to_node(&node_id).map(|_| session_info(session));
            let _ = tx.send(result);
        }
        ApiCommand::Control(control, tx) => {
            match control {
                SessionControl::Pause => session.pause(),
                SessionControl::Resume => session.resume(),
                SessionControl::Step => session.step(),
                SessionControl::Stop => session.stop(),
            }
            info!("[GameQuest API] Session control: {control:?}");
            let _ = tx.send(Ok(session_info(session)));
        }
        ApiCommand::GetScriptErrors(tx) => {
            let _ = tx.send(session.script_errors().entries().cloned().collect());
        }
        ApiCommand::GetEvents(since, tx) => {
            let _ = tx.send(session.events().since(since));
        }
        ApiCommand::GetRoom(tx) => {
            let _ = tx.send(session.room().cloned());
        }
    }
}
