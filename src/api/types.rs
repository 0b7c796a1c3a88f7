use serde::{Deserialize, Serialize};

use crate::session::SessionStatus;

#[derive(Serialize, Deserialize, Debug)]
pub struct ApiResponse<T: Serialize> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn ok() -> ApiResponse<String> {
        ApiResponse {
            ok: true,
            data: Some("ok".to_string()),
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> ApiResponse<String> {
        ApiResponse {
            ok: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

impl<T: Serialize> From<Result<T, String>> for ApiResponse<T> {
    fn from(result: Result<T, String>) -> Self {
        match result {
            Ok(data) => Self::success(data),
            Err(e) => Self {
                ok: false,
                data: None,
                error: Some(e),
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SessionInfo {
    pub status: SessionStatus,
    pub frame: u64,
    pub game_id: String,
    pub title: String,
    pub current_node: Option<String>,
    pub paused: bool,
    pub room_id: Option<String>,
    pub room_polling: bool,
    pub entity_count: usize,
    pub script_errors: usize,
    pub script_errors_total: u64,
    pub event_count: usize,
}

#[derive(Deserialize, Debug)]
pub struct NodeRequest {
    pub node_id: String,
}

#[derive(Deserialize, Debug, Default)]
pub struct EventsQuery {
    #[serde(default)]
    pub since: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionControl {
    Pause,
    Resume,
    Step,
    Stop,
}
