use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_SPRITE_SIZE: f64 = 50.0;

/// Sprite identifier as authored scripts pass it. Text and numeric ids never
/// compare equal (`"1"` and `1` are different sprites).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityKey {
    Int(i64),
    Text(String),
}

impl EntityKey {
    /// Numeric ids arrive as floats from some hosts; integral values collapse
    /// onto `Int` so `1.0` and `1` name the same sprite.
    pub fn from_f64(value: f64) -> Self {
        if value.fract() == 0.0 && value.is_finite() && value.abs() < i64::MAX as f64 {
            Self::Int(value as i64)
        } else {
            Self::Text(value.to_string())
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl From<&str> for EntityKey {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for EntityKey {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for EntityKey {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

/// A sprite owned by the [`EntityStore`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: EntityKey,
    #[serde(rename = "image")]
    pub image_ref: String,
    pub x: f64,
    pub y: f64,
    pub velocity_x: f64,
    pub velocity_y: f64,
    /// Degrees.
    pub rotation: f64,
    pub scale: f64,
    pub visible: bool,
    pub width: f64,
    pub height: f64,
    /// Ad hoc gameplay flags (`isGrounded`, …) written by scripts.
    #[serde(flatten)]
    pub flags: serde_json::Map<String, serde_json::Value>,
}

impl Entity {
    pub fn new(id: EntityKey, image_ref: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            id,
            image_ref: image_ref.into(),
            x,
            y,
            velocity_x: 0.0,
            velocity_y: 0.0,
            rotation: 0.0,
            scale: 1.0,
            visible: true,
            width: DEFAULT_SPRITE_SIZE,
            height: DEFAULT_SPRITE_SIZE,
            flags: serde_json::Map::new(),
        }
    }

    pub fn flag(&self, name: &str) -> Option<&serde_json::Value> {
        self.flags.get(name)
    }

    pub fn flag_is_set(&self, name: &str) -> bool {
        self.flags.get(name).is_some_and(json_truthy)
    }

    pub fn set_flag(&mut self, name: impl Into<String>, value: serde_json::Value) {
        self.flags.insert(name.into(), value);
    }

    pub fn is_grounded(&self) -> bool {
        self.flag_is_set("isGrounded")
    }

    pub fn overlaps(&self, other: &Entity) -> bool {
        self.x < other.x + other.width
            && self.x + self.width > other.x
            && self.y < other.y + other.height
            && self.y + self.height > other.y
    }
}

pub(crate) fn json_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0 && !v.is_nan()),
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => true,
    }
}

/// Position of an entity inside its store. Entities are never removed during
/// a session, so a slot stays valid for the store's lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SpriteSlot(pub usize);

/// Sole owner of every sprite in a play session.
///
/// Duplicate ids are allowed and coexist; every id-based operation resolves
/// to the first sprite created with that id. Operations on ids that were
/// never created are silent no-ops.
#[derive(Default, Debug, Clone)]
pub struct EntityStore {
    entities: Vec<Entity>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(
        &mut self,
        id: impl Into<EntityKey>,
        image_ref: impl Into<String>,
        x: f64,
        y: f64,
    ) -> SpriteSlot {
        self.entities.push(Entity::new(id.into(), image_ref, x, y));
        SpriteSlot(self.entities.len() - 1)
    }

    pub fn slot_of(&self, id: &EntityKey) -> Option<SpriteSlot> {
        self.entities.iter().position(|e| &e.id == id).map(SpriteSlot)
    }

    pub fn get(&self, id: &EntityKey) -> Option<&Entity> {
        self.entities.iter().find(|e| &e.id == id)
    }

    pub fn get_mut(&mut self, id: &EntityKey) -> Option<&mut Entity> {
        self.entities.iter_mut().find(|e| &e.id == id)
    }

    pub fn by_slot(&self, slot: SpriteSlot) -> Option<&Entity> {
        self.entities.get(slot.0)
    }

    pub fn by_slot_mut(&mut self, slot: SpriteSlot) -> Option<&mut Entity> {
        self.entities.get_mut(slot.0)
    }

    pub fn move_by(&mut self, id: &EntityKey, dx: f64, dy: f64) {
        if let Some(e) = self.get_mut(id) {
            e.x += dx;
            e.y += dy;
        }
    }

    pub fn set_position(&mut self, id: &EntityKey, x: f64, y: f64) {
        if let Some(e) = self.get_mut(id) {
            e.x = x;
            e.y = y;
        }
    }

    pub fn rotate(&mut self, id: &EntityKey, angle: f64) {
        if let Some(e) = self.get_mut(id) {
            e.rotation = angle;
        }
    }

    pub fn intersects(&self, a: &EntityKey, b: &EntityKey) -> bool {
        match (self.get(a), self.get(b)) {
            (Some(a), Some(b)) => a.overlaps(b),
            _ => false,
        }
    }

    /// Creation order, which is also draw order.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
