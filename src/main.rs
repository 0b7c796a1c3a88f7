#![cfg_attr(target_arch = "wasm32", allow(dead_code))]

#[cfg(not(target_arch = "wasm32"))]
mod api;
mod assets;
mod canvas;
mod config;
mod entity;
mod events;
#[cfg(not(target_arch = "wasm32"))]
mod file_watcher;
mod game_data;
mod input;
mod physics;
mod render;
mod room;
mod runtime_plugin;
mod scripting;
mod session;
mod sync;

use bevy::prelude::*;
use std::sync::Arc;

use config::{load_startup_config, LaunchOptions};
use game_data::GameMakerGame;
use room::{FileRoomStore, RoomStore};
use session::PlaySession;
use sync::{LobbyOutcome, PollCadence, LOBBY_POLL_INTERVAL};

fn load_game(opts: &LaunchOptions) -> Result<GameMakerGame, String> {
    if let Some(path) = &opts.game_path {
        let game = GameMakerGame::load(path)?;
        println!(
            "[GameQuest] Loaded '{}' from {} ({} nodes)",
            game.title,
            path.display(),
            game.game_data.nodes.len()
        );
        return Ok(game);
    }
    if let Some(embedded) = GameMakerGame::embedded() {
        let game = embedded?;
        println!("[GameQuest] Using embedded game '{}'", game.title);
        return Ok(game);
    }
    println!("[GameQuest] No game given; running the built-in demo");
    Ok(GameMakerGame::demo())
}

/// Holds the player in the lobby until the host starts the room. `Err`
/// carries the process exit code.
fn wait_in_lobby(store: &dyn RoomStore, room_id: &str, game: &GameMakerGame) -> Result<(), i32> {
    println!("[GameQuest lobby] Waiting for room {room_id} to start");
    // nothing cancels the wait from inside the process; Ctrl-C ends it
    let (_cancel_tx, cancel) = crossbeam_channel::bounded::<()>(0);
    match sync::wait_for_start(store, room_id, LOBBY_POLL_INTERVAL, &cancel) {
        LobbyOutcome::Started(room) => {
            if let Some(expected) = room.gamemaker_game_id.as_deref() {
                if !game.id.is_empty() && expected != game.id {
                    eprintln!(
                        "[GameQuest lobby] Room {room_id} is for game {expected}, loaded {}",
                        game.id
                    );
                }
            }
            println!(
                "[GameQuest lobby] Room {} started with {} player(s)",
                room.id,
                room.players.len()
            );
            Ok(())
        }
        LobbyOutcome::Finished(_) => {
            println!("[GameQuest lobby] Room {room_id} has already finished");
            Err(0)
        }
        LobbyOutcome::Missing => {
            eprintln!("[GameQuest lobby] Room {room_id} not found");
            Err(1)
        }
        LobbyOutcome::Cancelled => Err(0),
    }
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let startup_config = load_startup_config();
    let opts = match LaunchOptions::resolve(&args, startup_config, |name| std::env::var(name).ok()) {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("[GameQuest] {e}");
            std::process::exit(2);
        }
    };

    let game = match load_game(&opts) {
        Ok(game) => game,
        Err(e) => {
            eprintln!("[GameQuest] {e}");
            std::process::exit(1);
        }
    };

    let mut session = PlaySession::new(game);
    if let (Some(room_id), Some(rooms_path)) = (&opts.room_id, &opts.rooms_path) {
        let store: Arc<dyn RoomStore> = Arc::new(FileRoomStore::new(rooms_path));
        if opts.lobby {
            if let Err(code) = wait_in_lobby(store.as_ref(), room_id, session.game()) {
                std::process::exit(code);
            }
        }
        println!(
            "[GameQuest] Syncing room {room_id} from {}",
            rooms_path.display()
        );
        session = session.with_room(store, room_id.clone(), PollCadence::InGame);
    }

    let mut app = App::new();
    if opts.headless {
        // Headless mode: no window, no presenter, just the frame loop
        app.add_plugins(MinimalPlugins);
        println!("[GameQuest] Starting in HEADLESS mode");
    } else {
        app.add_plugins(
            DefaultPlugins
                .set(WindowPlugin {
                    primary_window: Some(Window {
                        title: opts.window_title.clone(),
                        resolution: (opts.surface.width as f32, opts.surface.height as f32).into(),
                        present_mode: bevy::window::PresentMode::AutoVsync,
                        ..default()
                    }),
                    ..default()
                })
                .set(bevy::asset::AssetPlugin {
                    file_path: opts.assets_dir.clone(),
                    ..default()
                }),
        );
        let bg = opts.background_color;
        app.insert_resource(ClearColor(Color::srgb(bg[0], bg[1], bg[2])))
            .add_plugins(input::HostInputPlugin)
            .add_plugins(render::RenderPlugin);
        println!("[GameQuest] Starting in WINDOWED mode");
    }

    app.insert_non_send_resource(session)
        .add_plugins(runtime_plugin::PlayRuntimePlugin {
            surface: opts.surface,
            tick_hz: opts.tick_hz,
        });

    #[cfg(not(target_arch = "wasm32"))]
    {
        if opts.watch {
            if let Some(path) = &opts.game_path {
                app.add_plugins(file_watcher::GameFileWatcherPlugin { path: path.clone() });
            }
        }
        if opts.api {
            app.add_plugins(api::ApiPlugin { port: opts.api_port });
        }
    }

    match app.run() {
        AppExit::Success => {}
        AppExit::Error(code) => std::process::exit(i32::from(code.get())),
    }
}
