use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use super::routes::*;
use super::security::{api_guard, ApiSecurity};
use super::state::AppState;

pub(super) fn build_router(state: AppState, security: ApiSecurity) -> Router {
    Router::new()
        .route("/session", get(get_session))
        .route("/entities", get(list_entities))
        .route("/entities/{id}", get(get_entity))
        .route("/globals", get(get_globals).post(set_globals))
        .route("/input", post(send_input))
        .route("/node", post(go_to_node))
        .route("/pause", post(pause))
        .route("/resume", post(resume))
        .route("/step", post(step))
        .route("/stop", post(stop))
        .route("/scripts/errors", get(get_script_errors))
        .route("/events", get(get_events))
        .route("/room", get(get_room))
        .with_state(state)
        .layer(middleware::from_fn_with_state(security, api_guard))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::commands::{handle_command, ApiCommand};
    use crate::api::types::{ApiResponse, SessionInfo};
    use crate::canvas::CanvasDescriptor;
    use crate::entity::Entity;
    use crate::game_data::GameMakerGame;
    use crate::session::{PlaySession, SessionStatus};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde::de::DeserializeOwned;
    use tower::util::ServiceExt;

    /// Serves commands from a session living on its own thread, the way the
    /// frame thread does in the app.
    fn router_with_session() -> Router {
        let (sender, receiver) = crossbeam_channel::unbounded::<ApiCommand>();
        std::thread::spawn(move || {
            let mut session = PlaySession::new(GameMakerGame::demo());
            session.start(CanvasDescriptor::default()).expect("start");
            session
                .state_mut()
                .entities
                .create("player", "player", 64.0, 64.0);
            for cmd in receiver.iter() {
                handle_command(&mut session, cmd);
            }
        });
        build_router(AppState { sender }, ApiSecurity::new(None, 1000))
    }

    async fn call<T: serde::Serialize + DeserializeOwned>(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, ApiResponse<T>) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let res = app
            .clone()
            .oneshot(builder.body(body).expect("request"))
            .await
            .expect("response");
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .expect("body");
        (status, serde_json::from_slice(&bytes).expect("json"))
    }

    #[tokio::test]
    async fn session_and_entities_are_readable() {
        let app = router_with_session();
        let (status, res) = call::<SessionInfo>(&app, "GET", "/session", None).await;
        assert_eq!(status, StatusCode::OK);
        let info = res.data.expect("session");
        assert_eq!(info.status, SessionStatus::Running);
        assert_eq!(info.current_node.as_deref(), Some("start"));

        let (_, res) = call::<Entity>(&app, "GET", "/entities/player", None).await;
        assert_eq!(res.data.map(|e| e.x), Some(64.0));
        let (_, res) = call::<Entity>(&app, "GET", "/entities/ghost", None).await;
        assert!(!res.ok);
    }

    #[tokio::test]
    async fn globals_round_trip_through_the_session() {
        let app = router_with_session();
        let (_, res) = call::<serde_json::Value>(
            &app,
            "POST",
            "/globals",
            Some(serde_json::json!({"level": 2})),
        )
        .await;
        assert!(res.ok);
        let (_, res) = call::<serde_json::Value>(&app, "GET", "/globals", None).await;
        assert_eq!(res.data.expect("globals")["level"], 2);
    }

    #[tokio::test]
    async fn controls_and_input_follow_session_lifecycle() {
        let app = router_with_session();
        let (_, res) = call::<SessionInfo>(&app, "POST", "/pause", None).await;
        assert!(res.data.expect("info").paused);
        let (_, res) = call::<String>(
            &app,
            "POST",
            "/input",
            Some(serde_json::json!({"type": "key_down", "key": "a"})),
        )
        .await;
        assert!(res.ok);
        let (_, res) = call::<SessionInfo>(
            &app,
            "POST",
            "/node",
            Some(serde_json::json!({"node_id": "missing"})),
        )
        .await;
        assert!(!res.ok);

        let (_, res) = call::<SessionInfo>(&app, "POST", "/stop", None).await;
        assert_eq!(res.data.expect("info").status, SessionStatus::Stopped);
        let (_, res) = call::<String>(
            &app,
            "POST",
            "/input",
            Some(serde_json::json!({"type": "mouse_down"})),
        )
        .await;
        assert!(!res.ok);

        let (_, res) = call::<Vec<serde_json::Value>>(&app, "GET", "/events?since=0", None).await;
        let names: Vec<String> = res
            .data
            .expect("events")
            .iter()
            .filter_map(|e| e["name"].as_str().map(str::to_string))
            .collect();
        assert!(names.contains(&"session_started".to_string()));
        assert!(names.contains(&"session_stopped".to_string()));
    }

    #[tokio::test]
    async fn room_is_an_error_without_multiplayer() {
        let app = router_with_session();
        let (_, res) = call::<serde_json::Value>(&app, "GET", "/room", None).await;
        assert!(!res.ok);
        assert!(res.error.is_some());
    }
}
