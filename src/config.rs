use serde::Deserialize;
use std::path::PathBuf;

use crate::canvas::CanvasDescriptor;
use crate::runtime_plugin::DEFAULT_TICK_HZ;

pub const DEFAULT_API_PORT: u16 = 3000;

/// `play.json` contents. Every field is optional; env vars and CLI flags
/// take precedence.
#[derive(Deserialize, Default, Debug, Clone)]
pub struct StartupConfig {
    pub window_title: Option<String>,
    pub window_width: Option<f64>,
    pub window_height: Option<f64>,
    pub background_color: Option<[f32; 3]>,
    pub assets_dir: Option<String>,
    pub game_path: Option<String>,
    pub room_id: Option<String>,
    pub rooms_path: Option<String>,
    pub tick_hz: Option<f64>,
    pub api_port: Option<u16>,
    #[serde(default)]
    pub lobby: bool,
    #[serde(default)]
    pub watch: bool,
    #[serde(default)]
    pub api: bool,
}

pub fn load_startup_config() -> StartupConfig {
    let path = std::env::var("GAMEQUEST_PLAY_CONFIG")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "play.json".to_string());
    match std::fs::read_to_string(&path) {
        Ok(contents) => match serde_json::from_str::<StartupConfig>(&contents) {
            Ok(cfg) => {
                println!("[GameQuest] Loaded startup config from {}", path);
                cfg
            }
            Err(e) => {
                eprintln!("[GameQuest] Failed to parse {}: {}", path, e);
                StartupConfig::default()
            }
        },
        Err(_) => StartupConfig::default(),
    }
}

/// Fully resolved launch settings.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchOptions {
    pub headless: bool,
    pub game_path: Option<PathBuf>,
    pub room_id: Option<String>,
    pub rooms_path: Option<PathBuf>,
    pub lobby: bool,
    pub watch: bool,
    pub api: bool,
    pub api_port: u16,
    pub surface: CanvasDescriptor,
    pub tick_hz: f64,
    pub window_title: String,
    pub background_color: [f32; 3],
    pub assets_dir: String,
}

impl LaunchOptions {
    /// Precedence is CLI flag, then `GAMEQUEST_*` env var, then `play.json`,
    /// then the built-in default.
    pub fn resolve(
        args: &[String],
        file: StartupConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, String> {
        let env = |name: &str| env(name).filter(|v| !v.trim().is_empty());
        let flag = |name: &str| args.iter().any(|a| a == name);
        let value = |name: &str| -> Result<Option<String>, String> {
            match args.iter().position(|a| a == name) {
                Some(i) => args
                    .get(i + 1)
                    .filter(|v| !v.starts_with("--"))
                    .cloned()
                    .map(Some)
                    .ok_or_else(|| format!("{name} needs a value")),
                None => Ok(None),
            }
        };
        let env_flag = |name: &str| {
            env(name).is_some_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        };

        let game_path = value("--game")?
            .or_else(|| env("GAMEQUEST_GAME"))
            .or(file.game_path)
            .map(PathBuf::from);
        let room_id = value("--room")?.or_else(|| env("GAMEQUEST_ROOM")).or(file.room_id);
        let rooms_path = value("--rooms")?
            .or_else(|| env("GAMEQUEST_ROOMS_FILE"))
            .or(file.rooms_path)
            .map(PathBuf::from);
        let lobby = flag("--lobby") || env_flag("GAMEQUEST_LOBBY") || file.lobby;
        let watch = flag("--watch") || env_flag("GAMEQUEST_WATCH") || file.watch;
        let api = flag("--api") || env_flag("GAMEQUEST_API") || file.api;

        let api_port = match env("GAMEQUEST_API_PORT") {
            Some(v) => v
                .trim()
                .parse::<u16>()
                .map_err(|_| format!("GAMEQUEST_API_PORT is not a port: {v}"))?,
            None => file.api_port.unwrap_or(DEFAULT_API_PORT),
        };
        let tick_hz = match env("GAMEQUEST_TICK_HZ") {
            Some(v) => v
                .trim()
                .parse::<f64>()
                .map_err(|_| format!("GAMEQUEST_TICK_HZ is not a number: {v}"))?,
            None => file.tick_hz.unwrap_or(DEFAULT_TICK_HZ),
        };
        if !(tick_hz > 0.0 && tick_hz.is_finite()) {
            return Err(format!("tick rate must be positive, got {tick_hz}"));
        }

        if room_id.is_some() && rooms_path.is_none() {
            return Err("--room needs a room store (--rooms <path>)".to_string());
        }
        if lobby && room_id.is_none() {
            return Err("--lobby needs --room <id>".to_string());
        }
        if watch && game_path.is_none() {
            return Err("--watch needs --game <path>".to_string());
        }

        let defaults = CanvasDescriptor::default();
        Ok(Self {
            headless: flag("--headless") || env_flag("GAMEQUEST_HEADLESS"),
            game_path,
            room_id,
            rooms_path,
            lobby,
            watch,
            api,
            api_port,
            surface: CanvasDescriptor {
                width: file.window_width.unwrap_or(defaults.width),
                height: file.window_height.unwrap_or(defaults.height),
            },
            tick_hz,
            window_title: file.window_title.unwrap_or_else(|| "GameQuest".to_string()),
            background_color: file.background_color.unwrap_or([0.0, 0.0, 0.0]),
            assets_dir: env("GAMEQUEST_ASSETS_DIR")
                .or(file.assets_dir)
                .unwrap_or_else(|| "assets".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("gamequest")
            .chain(list.iter().copied())
            .map(str::to_string)
            .collect()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults_without_any_input() {
        let opts = LaunchOptions::resolve(&args(&[]), StartupConfig::default(), no_env).expect("opts");
        assert!(!opts.headless);
        assert_eq!(opts.game_path, None);
        assert_eq!(opts.api_port, DEFAULT_API_PORT);
        assert_eq!(opts.tick_hz, DEFAULT_TICK_HZ);
        assert_eq!(opts.surface, CanvasDescriptor::default());
        assert_eq!(opts.assets_dir, "assets");
    }

    #[test]
    fn cli_beats_env_beats_file() {
        let file: StartupConfig = serde_json::from_value(serde_json::json!({
            "game_path": "file.json",
            "rooms_path": "rooms.json",
            "room_id": "file-room",
            "window_width": 640.0,
            "api_port": 4000
        }))
        .expect("config");
        let env: HashMap<&str, &str> =
            HashMap::from([("GAMEQUEST_GAME", "env.json"), ("GAMEQUEST_ROOM", "env-room")]);
        let opts = LaunchOptions::resolve(
            &args(&["--headless", "--game", "cli.json", "--api"]),
            file,
            |k| env.get(k).map(|v| v.to_string()),
        )
        .expect("opts");
        assert!(opts.headless);
        assert!(opts.api);
        assert_eq!(opts.game_path, Some(PathBuf::from("cli.json")));
        assert_eq!(opts.room_id.as_deref(), Some("env-room"));
        assert_eq!(opts.rooms_path, Some(PathBuf::from("rooms.json")));
        assert_eq!(opts.surface.width, 640.0);
        assert_eq!(opts.api_port, 4000);
    }

    #[test]
    fn rejects_inconsistent_flags() {
        let resolve = |list: &[&str]| LaunchOptions::resolve(&args(list), StartupConfig::default(), no_env);
        assert!(resolve(&["--game"]).is_err());
        assert!(resolve(&["--room", "r1"]).is_err());
        assert!(resolve(&["--lobby"]).is_err());
        assert!(resolve(&["--watch"]).is_err());
        assert!(resolve(&["--room", "r1", "--rooms", "rooms.json", "--lobby"]).is_ok());
    }

    #[test]
    fn bad_env_numbers_are_errors() {
        let err = LaunchOptions::resolve(&args(&[]), StartupConfig::default(), |k| {
            (k == "GAMEQUEST_TICK_HZ").then(|| "fast".to_string())
        })
        .expect_err("tick");
        assert!(err.contains("GAMEQUEST_TICK_HZ"));
    }
}
