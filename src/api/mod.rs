mod commands;
mod router;
mod routes;
mod security;
mod state;
pub mod types;

use bevy::prelude::*;

pub use commands::{handle_command, session_info, ApiChannels, ApiCommand};
use commands::process_api_commands;
use router::build_router;
use security::ApiSecurity;
use state::AppState;

/// Local HTTP control surface for a running session.
pub struct ApiPlugin {
    pub port: u16,
}

impl Plugin for ApiPlugin {
    fn build(&self, app: &mut App) {
        let (tx, rx) = crossbeam_channel::unbounded::<ApiCommand>();
        app.insert_resource(ApiChannels { receiver: rx })
            .add_systems(Update, process_api_commands);

        let state = AppState { sender: tx };
        let security = ApiSecurity::from_env();
        if security.required_token.is_none() {
            warn!("[GameQuest API] GAMEQUEST_API_TOKEN is not set; the control API is open on localhost");
        }
        let port = self.port;
        let spawned = std::thread::Builder::new()
            .name("gamequest-api".to_string())
            .spawn(move || {
                let rt = match tokio::runtime::Runtime::new() {
                    Ok(rt) => rt,
                    Err(e) => {
                        error!("[GameQuest API] Failed to start async runtime: {e}");
                        return;
                    }
                };
                rt.block_on(async {
                    let app = build_router(state, security);
                    let addr = format!("127.0.0.1:{port}");
                    let listener = match tokio::net::TcpListener::bind(&addr).await {
                        Ok(listener) => listener,
                        Err(e) => {
                            error!("[GameQuest API] Failed to bind {addr}: {e}");
                            return;
                        }
                    };
                    println!("[GameQuest API] Listening on http://{addr}");
                    if let Err(e) = axum::serve(listener, app).await {
                        error!("[GameQuest API] Server stopped: {e}");
                    }
                });
            });
        if let Err(e) = spawned {
            error!("[GameQuest API] Failed to spawn API thread: {e}");
        }
    }
}
