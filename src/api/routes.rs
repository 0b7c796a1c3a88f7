use axum::{
    extract::{Path, Query, State},
    Json,
};

use super::commands::ApiCommand;
use super::state::AppState;
use super::types::{ApiResponse, EventsQuery, NodeRequest, SessionControl, SessionInfo};
use crate::entity::Entity;
use crate::events::RuntimeEvent;
use crate::input::InputEvent;
use crate::room::RoomRecord;
use crate::scripting::ScriptError;

type JsonMap = serde_json::Map<String, serde_json::Value>;

pub(super) async fn get_session(State(state): State<AppState>) -> Json<ApiResponse<SessionInfo>> {
    Json(state.ask(ApiCommand::GetSession).await.into())
}

pub(super) async fn list_entities(State(state): State<AppState>) -> Json<ApiResponse<Vec<Entity>>> {
    Json(state.ask(ApiCommand::ListEntities).await.into())
}

pub(super) async fn get_entity(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<ApiResponse<Entity>> {
    let result = state
        .ask(|tx| ApiCommand::GetEntity(id.clone(), tx))
        .await
        .and_then(|found| found.ok_or_else(|| format!("No sprite with id '{id}'")));
    Json(result.into())
}

pub(super) async fn get_globals(State(state): State<AppState>) -> Json<ApiResponse<JsonMap>> {
    Json(state.ask(ApiCommand::GetGlobals).await.into())
}

pub(super) async fn set_globals(
    State(state): State<AppState>,
    Json(values): Json<JsonMap>,
) -> Json<ApiResponse<JsonMap>> {
    let result = state
        .ask(|tx| ApiCommand::SetGlobals(values, tx))
        .await
        .and_then(|r| r);
    Json(result.into())
}

pub(super) async fn send_input(
    State(state): State<AppState>,
    Json(event): Json<InputEvent>,
) -> Json<ApiResponse<String>> {
    match state.ask(|tx| ApiCommand::SendInput(event, tx)).await {
        Ok(Ok(())) => Json(ApiResponse::ok()),
        Ok(Err(e)) | Err(e) => Json(ApiResponse::err(e)),
    }
}

pub(super) async fn go_to_node(
    State(state): State<AppState>,
    Json(req): Json<NodeRequest>,
) -> Json<ApiResponse<SessionInfo>> {
    let result = state
        .ask(|tx| ApiCommand::GoToNode(req.node_id, tx))
        .await
        .and_then(|r| r);
    Json(result.into())
}

async fn control(state: AppState, control: SessionControl) -> Json<ApiResponse<SessionInfo>> {
    let result = state
        .ask(|tx| ApiCommand::Control(control, tx))
        .await
        .and_then(|r| r);
    Json(result.into())
}

pub(super) async fn pause(State(state): State<AppState>) -> Json<ApiResponse<SessionInfo>> {
    control(state, SessionControl::Pause).await
}

pub(super) async fn resume(State(state): State<AppState>) -> Json<ApiResponse<SessionInfo>> {
    control(state, SessionControl::Resume).await
}

pub(super) async fn step(State(state): State<AppState>) -> Json<ApiResponse<SessionInfo>> {
    control(state, SessionControl::Step).await
}

pub(super) async fn stop(State(state): State<AppState>) -> Json<ApiResponse<SessionInfo>> {
    control(state, SessionControl::Stop).await
}

pub(super) async fn get_script_errors(
    State(state): State<AppState>,
) -> Json<ApiResponse<Vec<ScriptError>>> {
    Json(state.ask(ApiCommand::GetScriptErrors).await.into())
}

pub(super) async fn get_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Json<ApiResponse<Vec<RuntimeEvent>>> {
    Json(state.ask(|tx| ApiCommand::GetEvents(query.since, tx)).await.into())
}

pub(super) async fn get_room(State(state): State<AppState>) -> Json<ApiResponse<RoomRecord>> {
    let result = state
        .ask(ApiCommand::GetRoom)
        .await
        .and_then(|room| room.ok_or_else(|| "No room has been polled for this session".to_string()));
    Json(result.into())
}
