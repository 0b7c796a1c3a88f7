use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::assets::AssetRef;

/// Node type that marks the entry point of an authored game.
pub const START_NODE_TYPE: &str = "startgame";

const EMBEDDED_GAME: &str = include_str!(concat!(env!("OUT_DIR"), "/gamequest_embedded_game.json"));

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodingMode {
    /// Visual blocks. Translation to script text happens at authoring time.
    #[default]
    Blockly,
    #[serde(alias = "script", alias = "rhai")]
    Javascript,
}

/// One authored code unit of the node graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameNode {
    pub id: String,
    #[serde(rename = "type", default)]
    pub node_type: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub javascript_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blockly_xml: Option<String>,
    #[serde(default)]
    pub coding_mode: CodingMode,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
}

impl GameNode {
    /// Script text to run each frame, if this node is in script mode.
    pub fn script_body(&self) -> Option<&str> {
        match self.coding_mode {
            CodingMode::Javascript => self
                .javascript_code
                .as_deref()
                .filter(|code| !code.trim().is_empty()),
            CodingMode::Blockly => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameData {
    #[serde(default)]
    pub nodes: Vec<GameNode>,
    #[serde(default)]
    pub connections: Vec<serde_json::Value>,
    #[serde(default)]
    pub shared_assets: Vec<AssetRef>,
}

impl GameData {
    /// First node typed as the entry point, else the first node authored.
    pub fn start_node_index(&self) -> Option<usize> {
        self.nodes
            .iter()
            .position(|n| n.node_type == START_NODE_TYPE)
            .or(if self.nodes.is_empty() { None } else { Some(0) })
    }

    pub fn node_index(&self, id: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == id)
    }
}

/// `GameMakerGame` record as stored by the hosting platform.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GameMakerGame {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub game_data: GameData,
}

impl GameMakerGame {
    pub fn from_json(source: &str) -> Result<Self, String> {
        serde_json::from_str(source).map_err(|e| format!("Invalid game record: {e}"))
    }

    pub fn load(path: &Path) -> Result<Self, String> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
        Self::from_json(&source)
    }

    pub fn is_empty(&self) -> bool {
        self.game_data.nodes.is_empty()
    }

    /// Game baked in at build time via `GAMEQUEST_EMBED_GAME_PATH`, if any.
    pub fn embedded() -> Option<Result<Self, String>> {
        match Self::from_json(EMBEDDED_GAME) {
            Ok(game) if game.is_empty() => None,
            result => Some(result),
        }
    }

    /// Small built-in game used when no game file is given.
    pub fn demo() -> Self {
        let script = r##"
if type_of(game.getSprite("player")) == "()" {
    let p = game.createSprite("player", "player", 64, 64);
    p.width = 32;
    p.height = 32;
    game.setGlobal("score", 0);
}
let speed = 4;
if game.isKeyPressed("ArrowLeft") { game.moveSprite("player", -speed, 0); }
if game.isKeyPressed("ArrowRight") { game.moveSprite("player", speed, 0); }
if game.isKeyPressed("ArrowUp") { game.moveSprite("player", 0, -speed); }
if game.isKeyPressed("ArrowDown") { game.moveSprite("player", 0, speed); }
if game.isMouseClicked() {
    game.setGlobal("score", game.getGlobal("score") + 1);
}
let p = game.getSprite("player");
ctx.fillStyle = "#facc15";
ctx.fillRect(p.x, p.y, p.width, p.height);
ctx.fillStyle = "#ffffff";
ctx.font = "24px sans-serif";
ctx.fillText(`Score: ${game.getGlobal("score")}`, 16, 32);
"##;
        Self {
            id: "demo".to_string(),
            title: "Demo".to_string(),
            game_data: GameData {
                nodes: vec![GameNode {
                    id: "start".to_string(),
                    node_type: START_NODE_TYPE.to_string(),
                    x: 100.0,
                    y: 100.0,
                    label: "Start".to_string(),
                    javascript_code: Some(script.to_string()),
                    blockly_xml: None,
                    coding_mode: CodingMode::Javascript,
                    inputs: Vec::new(),
                    outputs: Vec::new(),
                }],
                connections: Vec::new(),
                shared_assets: Vec::new(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetKind;

    fn node(id: &str, node_type: &str) -> GameNode {
        GameNode {
            id: id.to_string(),
            node_type: node_type.to_string(),
            x: 0.0,
            y: 0.0,
            label: String::new(),
            javascript_code: None,
            blockly_xml: None,
            coding_mode: CodingMode::Javascript,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    #[test]
    fn start_node_prefers_entry_type_then_authoring_order() {
        let mut data = GameData::default();
        assert_eq!(data.start_node_index(), None);
        data.nodes = vec![node("a", "scene"), node("b", "scene")];
        assert_eq!(data.start_node_index(), Some(0));
        data.nodes.push(node("c", START_NODE_TYPE));
        assert_eq!(data.start_node_index(), Some(2));
    }

    #[test]
    fn parses_platform_record_shape() {
        let game = GameMakerGame::from_json(
            r#"{
                "id": "g1",
                "title": "Jumper",
                "created_by": "someone@example.com",
                "game_data": {
                    "nodes": [{
                        "id": "n1", "type": "startgame", "x": 10, "y": 20, "label": "Start",
                        "javascriptCode": "game.setGlobal(\"a\", 1);",
                        "codingMode": "javascript",
                        "inputs": ["in"], "outputs": []
                    }, {
                        "id": "n2", "type": "scene", "x": 0, "y": 0, "label": "Blocks",
                        "blocklyXml": "<xml/>", "codingMode": "blockly"
                    }],
                    "connections": [],
                    "sharedAssets": [{"type": "sprite", "name": "hero", "url": "hero.png", "size": 4}]
                }
            }"#,
        )
        .expect("parse");
        assert_eq!(game.game_data.nodes.len(), 2);
        assert_eq!(game.game_data.shared_assets.len(), 1);
        assert_eq!(
            game.game_data.nodes[0].script_body(),
            Some("game.setGlobal(\"a\", 1);")
        );
        assert_eq!(game.game_data.nodes[1].script_body(), None);
        assert_eq!(game.game_data.node_index("n2"), Some(1));
    }

    #[test]
    fn games_with_generated_assets_still_load() {
        let game = GameMakerGame::from_json(
            r#"{
                "id": "g2",
                "title": "Caves",
                "game_data": {
                    "nodes": [{"id": "start", "type": "startgame", "codingMode": "javascript",
                               "javascriptCode": "let a = 1;"}],
                    "sharedAssets": [
                        {"type": "background", "url": "https://cdn/cave.png", "description": "dark cave"},
                        {"type": "character", "url": "https://cdn/hero.png", "description": "hero"},
                        {"type": "item", "url": "https://cdn/gem.png", "description": "gem"},
                        {"type": "sprite", "url": "https://cdn/bat.png", "description": "bat"},
                        {"type": "sprite", "name": "coin", "url": "coin.png", "size": 12}
                    ]
                }
            }"#,
        )
        .expect("generated assets must not fail the game");
        assert_eq!(game.game_data.shared_assets.len(), 5);
        assert_eq!(game.game_data.shared_assets[0].kind, AssetKind::Other);
        assert_eq!(game.game_data.shared_assets[3].kind, AssetKind::Sprite);
        assert!(game.game_data.shared_assets[3].name.is_empty());
    }

    #[test]
    fn rejects_malformed_records() {
        assert!(GameMakerGame::from_json("{\"game_data\": 3}").is_err());
    }

    #[test]
    fn demo_game_has_a_runnable_entry() {
        let demo = GameMakerGame::demo();
        let start = demo.game_data.start_node_index().expect("start");
        assert!(demo.game_data.nodes[start].script_body().is_some());
    }
}
