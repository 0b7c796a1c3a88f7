use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Sprite,
    Sound,
    Data,
    /// Generated art (`background`, `character`, `item`) and anything newer.
    #[serde(other)]
    Other,
}

/// Uploaded or generated asset as listed in a game's `sharedAssets`.
/// Generated entries carry no name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssetRef {
    #[serde(rename = "type")]
    pub kind: AssetKind,
    #[serde(default)]
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub size: u64,
}

/// Resolves a sprite's `imageRef` to an image url. Only sprite assets are
/// registered; every other kind is opaque to the runtime.
#[derive(Clone, Debug, Default)]
pub struct SpriteRegistry {
    by_key: HashMap<String, String>,
}

impl SpriteRegistry {
    pub fn from_assets(assets: &[AssetRef]) -> Self {
        let mut registry = Self::default();
        for asset in assets.iter().filter(|a| a.kind == AssetKind::Sprite) {
            registry.insert(asset.name.clone(), asset.url.clone());
        }
        registry
    }

    /// Both the asset name and its url resolve.
    pub fn insert(&mut self, name: String, url: String) {
        self.by_key.insert(url.clone(), url.clone());
        if !name.is_empty() {
            self.by_key.insert(name, url);
        }
    }

    pub fn resolve(&self, image_ref: &str) -> Option<&str> {
        self.by_key.get(image_ref).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_sprites_by_name_or_url_only() {
        let assets: Vec<AssetRef> = serde_json::from_value(serde_json::json!([
            {"type": "sprite", "name": "hero", "url": "https://cdn/hero.png", "size": 1200},
            {"type": "sound", "name": "jump", "url": "https://cdn/jump.wav", "size": 90},
            {"type": "data", "name": "level", "url": "https://cdn/level.json"}
        ]))
        .expect("assets");
        let registry = SpriteRegistry::from_assets(&assets);
        assert_eq!(registry.resolve("hero"), Some("https://cdn/hero.png"));
        assert_eq!(
            registry.resolve("https://cdn/hero.png"),
            Some("https://cdn/hero.png")
        );
        assert_eq!(registry.resolve("jump"), None);
        assert_eq!(registry.resolve("level"), None);
    }

    #[test]
    fn generated_assets_parse_and_stay_opaque() {
        let assets: Vec<AssetRef> = serde_json::from_value(serde_json::json!([
            {"type": "background", "url": "https://cdn/sky.png", "description": "night sky"},
            {"type": "sprite", "url": "https://cdn/bat.png", "description": "a bat"}
        ]))
        .expect("generated assets");
        assert_eq!(assets[0].kind, AssetKind::Other);
        assert!(assets[1].name.is_empty());

        let registry = SpriteRegistry::from_assets(&assets);
        assert_eq!(registry.resolve("https://cdn/bat.png"), Some("https://cdn/bat.png"));
        assert_eq!(registry.resolve("https://cdn/sky.png"), None);
        assert_eq!(registry.resolve(""), None);
    }
}
