use rhai::{Array, Dynamic, Engine, ImmutableString, Map, FLOAT, INT};
use serde::Serialize;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::canvas::{Canvas2d, CanvasDescriptor};
use crate::entity::{EntityKey, EntityStore, SpriteSlot};
use crate::input::InputSnapshot;
use crate::physics::{self, Direction, DEFAULT_GRID_SIZE};

pub type Globals = BTreeMap<String, Dynamic>;

/// Message a script sent to another node with `broadcastToNode`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Broadcast {
    pub node_id: String,
    pub message: serde_json::Value,
}

/// Everything a frame's scripts can reach through `game`.
#[derive(Default)]
pub struct PlayState {
    pub entities: EntityStore,
    /// `gameState`: written by `setGlobal` and by shared-state merges.
    pub globals: Globals,
    /// Debug mirror of values written through `setGlobal` only.
    pub variables: Globals,
    pub input: InputSnapshot,
    pub paused: bool,
    pub step_requested: bool,
    pub platform_gravity: Option<f64>,
    pub pending_node: Option<String>,
    pub broadcasts: Vec<Broadcast>,
}

impl PlayState {
    pub fn set_global(&mut self, key: impl Into<String>, value: Dynamic) {
        let key = key.into();
        self.variables.insert(key.clone(), value.clone());
        self.globals.insert(key, value);
    }

    #[cfg(test)]
    pub fn global_json(&self, key: &str) -> Option<serde_json::Value> {
        self.globals.get(key).map(dynamic_to_json)
    }

    pub fn globals_json(&self) -> serde_json::Map<String, serde_json::Value> {
        self.globals
            .iter()
            .map(|(k, v)| (k.clone(), dynamic_to_json(v)))
            .collect()
    }

    /// Shallow assign: every top-level key of `shared` replaces the local
    /// value, keys absent from `shared` are left alone.
    pub fn merge_shared(&mut self, shared: &serde_json::Map<String, serde_json::Value>) {
        for (key, value) in shared {
            self.globals.insert(key.clone(), json_to_dynamic(value));
        }
    }
}

pub type SharedPlayState = Rc<RefCell<PlayState>>;

pub fn dynamic_to_json(value: &Dynamic) -> serde_json::Value {
    rhai::serde::from_dynamic::<serde_json::Value>(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()))
}

pub fn json_to_dynamic(value: &serde_json::Value) -> Dynamic {
    rhai::serde::to_dynamic(value).unwrap_or(Dynamic::UNIT)
}

/// JS-style numeric coercion for script arguments: ints and floats are both
/// accepted, anything else reads as 0.
fn num(value: &Dynamic) -> f64 {
    value
        .as_float()
        .or_else(|_| value.as_int().map(|v| v as FLOAT))
        .unwrap_or(0.0)
}

fn text(value: &Dynamic) -> String {
    match value.clone().into_immutable_string() {
        Ok(s) => s.to_string(),
        Err(_) => value.to_string(),
    }
}

pub fn key_of(value: &Dynamic) -> EntityKey {
    if let Ok(v) = value.as_int() {
        EntityKey::Int(v)
    } else if let Ok(v) = value.as_float() {
        EntityKey::from_f64(v)
    } else {
        EntityKey::Text(text(value))
    }
}

fn key_to_dynamic(key: &EntityKey) -> Dynamic {
    match key {
        EntityKey::Int(v) => Dynamic::from_int(*v),
        EntityKey::Text(v) => Dynamic::from(v.clone()),
    }
}

fn globals_map(globals: &Globals) -> Map {
    globals
        .iter()
        .map(|(k, v)| (k.as_str().into(), v.clone()))
        .collect()
}

fn point_map(x: f64, y: f64) -> Map {
    let mut map = Map::new();
    map.insert("x".into(), Dynamic::from_float(x));
    map.insert("y".into(), Dynamic::from_float(y));
    map
}

/// The `game` object bound into every script run.
#[derive(Clone)]
pub struct GameApi {
    state: SharedPlayState,
}

impl GameApi {
    pub fn new(state: SharedPlayState) -> Self {
        Self { state }
    }

    fn get_global(&mut self, key: &str) -> Dynamic {
        self.state
            .borrow()
            .globals
            .get(key)
            .cloned()
            .unwrap_or(Dynamic::UNIT)
    }

    fn set_global(&mut self, key: &str, value: Dynamic) {
        self.state.borrow_mut().set_global(key, value);
    }

    fn is_key_pressed(&mut self, key: &str) -> bool {
        self.state.borrow().input.is_key_pressed(key)
    }

    fn get_mouse_pos(&mut self) -> Map {
        let (x, y) = self.state.borrow().input.mouse_pos();
        point_map(x, y)
    }

    fn is_mouse_clicked(&mut self) -> bool {
        self.state.borrow().input.is_mouse_clicked()
    }

    fn create_sprite(&mut self, id: Dynamic, image: Dynamic, x: Dynamic, y: Dynamic) -> SpriteHandle {
        let slot = self
            .state
            .borrow_mut()
            .entities
            .create(key_of(&id), text(&image), num(&x), num(&y));
        SpriteHandle {
            state: self.state.clone(),
            slot,
        }
    }

    fn get_sprite(&mut self, id: Dynamic) -> Dynamic {
        let slot = self.state.borrow().entities.slot_of(&key_of(&id));
        match slot {
            Some(slot) => Dynamic::from(SpriteHandle {
                state: self.state.clone(),
                slot,
            }),
            None => Dynamic::UNIT,
        }
    }

    fn move_sprite(&mut self, id: Dynamic, dx: Dynamic, dy: Dynamic) {
        self.state
            .borrow_mut()
            .entities
            .move_by(&key_of(&id), num(&dx), num(&dy));
    }

    fn set_position(&mut self, id: Dynamic, x: Dynamic, y: Dynamic) {
        self.state
            .borrow_mut()
            .entities
            .set_position(&key_of(&id), num(&x), num(&y));
    }

    fn rotate_sprite(&mut self, id: Dynamic, angle: Dynamic) {
        self.state
            .borrow_mut()
            .entities
            .rotate(&key_of(&id), num(&angle));
    }

    fn apply_gravity(&mut self, id: Dynamic, force: Dynamic) {
        physics::apply_gravity(&mut self.state.borrow_mut().entities, &key_of(&id), num(&force));
    }

    fn apply_velocity(&mut self, id: Dynamic, vx: Dynamic, vy: Dynamic) {
        physics::apply_velocity(
            &mut self.state.borrow_mut().entities,
            &key_of(&id),
            num(&vx),
            num(&vy),
        );
    }

    fn check_collision(&mut self, a: Dynamic, b: Dynamic) -> bool {
        physics::check_collision(&self.state.borrow().entities, &key_of(&a), &key_of(&b))
    }

    fn go_to_node(&mut self, node_id: Dynamic) {
        self.state.borrow_mut().pending_node = Some(text(&node_id));
    }

    fn broadcast_to_node(&mut self, node_id: Dynamic, message: Dynamic) {
        self.state.borrow_mut().broadcasts.push(Broadcast {
            node_id: text(&node_id),
            message: dynamic_to_json(&message),
        });
    }

    fn pause(&mut self) {
        self.state.borrow_mut().paused = true;
    }

    fn resume(&mut self) {
        let mut state = self.state.borrow_mut();
        state.paused = false;
        state.step_requested = false;
    }

    fn step(&mut self) {
        let mut state = self.state.borrow_mut();
        state.paused = true;
        state.step_requested = true;
    }

    fn platform_set_gravity(&mut self, force: Dynamic) {
        self.state.borrow_mut().platform_gravity = Some(num(&force));
    }

    fn platform_jump(&mut self, id: Dynamic, force: Dynamic) {
        physics::platform_jump(&mut self.state.borrow_mut().entities, &key_of(&id), num(&force));
    }

    fn platform_is_grounded(&mut self, id: Dynamic) -> bool {
        physics::platform_is_grounded(&self.state.borrow().entities, &key_of(&id))
    }

    fn topdown_grid_move(&mut self, id: Dynamic, direction: &str, size: Dynamic) {
        let Some(direction) = Direction::parse(direction) else {
            return;
        };
        physics::grid_move(
            &mut self.state.borrow_mut().entities,
            &key_of(&id),
            direction,
            num(&size),
        );
    }

    /// Assigning `game.gameState` (or one of its keys) shallow-merges into
    /// the globals; keys not mentioned are kept.
    fn set_game_state(&mut self, values: Map) {
        let mut state = self.state.borrow_mut();
        for (key, value) in values {
            state.set_global(key.as_str(), value);
        }
    }

    fn topdown_set_grid_position(&mut self, id: Dynamic, gx: Dynamic, gy: Dynamic, size: Dynamic) {
        physics::set_grid_position(
            &mut self.state.borrow_mut().entities,
            &key_of(&id),
            num(&gx),
            num(&gy),
            num(&size),
        );
    }

    fn topdown_get_grid_position(&mut self, id: Dynamic, size: Dynamic) -> Dynamic {
        let cell =
            physics::get_grid_position(&self.state.borrow().entities, &key_of(&id), num(&size));
        match cell {
            Some((gx, gy)) => {
                let mut map = Map::new();
                map.insert("gridX".into(), Dynamic::from_int(gx as INT));
                map.insert("gridY".into(), Dynamic::from_int(gy as INT));
                Dynamic::from_map(map)
            }
            None => Dynamic::UNIT,
        }
    }

    fn entities(&mut self) -> Array {
        let len = self.state.borrow().entities.len();
        (0..len)
            .map(|i| {
                Dynamic::from(SpriteHandle {
                    state: self.state.clone(),
                    slot: SpriteSlot(i),
                })
            })
            .collect()
    }

    fn keys(&mut self) -> Map {
        self.state
            .borrow()
            .input
            .keys
            .iter()
            .map(|k| (k.as_str().into(), Dynamic::TRUE))
            .collect()
    }
}

/// Live reference to one sprite. Reads and writes go straight to the store,
/// so a handle kept in a local sees movement done through `game` calls.
#[derive(Clone)]
pub struct SpriteHandle {
    state: SharedPlayState,
    slot: SpriteSlot,
}

impl SpriteHandle {
    fn read<T>(&self, f: impl FnOnce(&crate::entity::Entity) -> T, fallback: T) -> T {
        self.state.borrow().entities.by_slot(self.slot).map_or(fallback, f)
    }

    fn write(&self, f: impl FnOnce(&mut crate::entity::Entity)) {
        if let Some(e) = self.state.borrow_mut().entities.by_slot_mut(self.slot) {
            f(e);
        }
    }

    fn flag(&mut self, name: &str) -> Dynamic {
        self.read(
            |e| e.flag(name).map(json_to_dynamic).unwrap_or(Dynamic::UNIT),
            Dynamic::UNIT,
        )
    }

    fn set_flag(&mut self, name: &str, value: Dynamic) {
        let value = dynamic_to_json(&value);
        self.write(|e| e.set_flag(name, value));
    }
}

/// The `ctx` object: a 2D drawing context over the session's canvas.
#[derive(Clone)]
pub struct CanvasApi {
    canvas: Rc<RefCell<Canvas2d>>,
}

impl CanvasApi {
    pub fn new(canvas: Rc<RefCell<Canvas2d>>) -> Self {
        Self { canvas }
    }
}

/// The `canvas` object scripts read `width` and `height` from.
pub fn canvas_info(descriptor: CanvasDescriptor) -> Map {
    let mut map = Map::new();
    map.insert("width".into(), Dynamic::from_float(descriptor.width));
    map.insert("height".into(), Dynamic::from_float(descriptor.height));
    map
}

pub fn register_game_api(engine: &mut Engine) {
    engine.register_type_with_name::<GameApi>("Game");
    engine.register_fn("getGlobal", GameApi::get_global);
    engine.register_fn("setGlobal", GameApi::set_global);
    engine.register_fn("isKeyPressed", GameApi::is_key_pressed);
    engine.register_fn("getMousePos", GameApi::get_mouse_pos);
    engine.register_fn("isMouseClicked", GameApi::is_mouse_clicked);
    engine.register_fn("createSprite", GameApi::create_sprite);
    engine.register_fn("getSprite", GameApi::get_sprite);
    engine.register_fn("moveSprite", GameApi::move_sprite);
    engine.register_fn("setPosition", GameApi::set_position);
    engine.register_fn("rotateSprite", GameApi::rotate_sprite);
    engine.register_fn("applyGravity", GameApi::apply_gravity);
    engine.register_fn("applyVelocity", GameApi::apply_velocity);
    engine.register_fn("checkCollision", GameApi::check_collision);
    engine.register_fn("goToNode", GameApi::go_to_node);
    engine.register_fn("broadcastToNode", GameApi::broadcast_to_node);
    engine.register_fn("pause", GameApi::pause);
    engine.register_fn("resume", GameApi::resume);
    engine.register_fn("step", GameApi::step);
    engine.register_fn("platformSetGravity", GameApi::platform_set_gravity);
    engine.register_fn("platformJump", GameApi::platform_jump);
    engine.register_fn("platformIsGrounded", GameApi::platform_is_grounded);
    engine.register_fn("topdownGridMove", GameApi::topdown_grid_move);
    engine.register_fn(
        "topdownGridMove",
        |g: &mut GameApi, id: Dynamic, direction: ImmutableString| {
            g.topdown_grid_move(id, &direction, Dynamic::from_float(DEFAULT_GRID_SIZE))
        },
    );
    engine.register_fn("topdownSetGridPosition", GameApi::topdown_set_grid_position);
    engine.register_fn(
        "topdownSetGridPosition",
        |g: &mut GameApi, id: Dynamic, gx: Dynamic, gy: Dynamic| {
            g.topdown_set_grid_position(id, gx, gy, Dynamic::from_float(DEFAULT_GRID_SIZE))
        },
    );
    engine.register_fn("topdownGetGridPosition", GameApi::topdown_get_grid_position);
    engine.register_fn("topdownGetGridPosition", |g: &mut GameApi, id: Dynamic| {
        g.topdown_get_grid_position(id, Dynamic::from_float(DEFAULT_GRID_SIZE))
    });

    engine.register_get_set(
        "gameState",
        |g: &mut GameApi| globals_map(&g.state.borrow().globals),
        GameApi::set_game_state,
    );
    engine.register_get("variables", |g: &mut GameApi| {
        globals_map(&g.state.borrow().variables)
    });
    engine.register_get("entities", GameApi::entities);
    engine.register_get("keys", GameApi::keys);
    engine.register_get("mousePos", GameApi::get_mouse_pos);
    engine.register_get("mouseClicked", GameApi::is_mouse_clicked);
    engine.register_get("isPaused", |g: &mut GameApi| g.state.borrow().paused);
    engine.register_get("platformGravity", |g: &mut GameApi| {
        g.state
            .borrow()
            .platform_gravity
            .map_or(Dynamic::UNIT, Dynamic::from_float)
    });

    register_sprite_handle(engine);
    register_canvas_api(engine);
}

fn register_sprite_handle(engine: &mut Engine) {
    engine.register_type_with_name::<SpriteHandle>("Sprite");
    engine.register_fn("to_string", |h: &mut SpriteHandle| {
        h.read(|e| format!("Sprite({})", e.id), "Sprite(?)".to_string())
    });

    engine.register_get("id", |h: &mut SpriteHandle| {
        h.read(|e| key_to_dynamic(&e.id), Dynamic::UNIT)
    });
    engine.register_set("id", |h: &mut SpriteHandle, v: Dynamic| {
        let key = key_of(&v);
        h.write(|e| e.id = key);
    });
    engine.register_get("image", |h: &mut SpriteHandle| {
        h.read(|e| e.image_ref.clone(), String::new())
    });
    engine.register_set("image", |h: &mut SpriteHandle, v: Dynamic| {
        let image = text(&v);
        h.write(|e| e.image_ref = image);
    });

    macro_rules! number_property {
        ($engine:ident, $name:literal, $field:ident) => {
            $engine.register_get($name, |h: &mut SpriteHandle| h.read(|e| e.$field, 0.0));
            $engine.register_set($name, |h: &mut SpriteHandle, v: Dynamic| {
                let v = num(&v);
                h.write(|e| e.$field = v);
            });
        };
    }
    number_property!(engine, "x", x);
    number_property!(engine, "y", y);
    number_property!(engine, "velocityX", velocity_x);
    number_property!(engine, "velocityY", velocity_y);
    number_property!(engine, "rotation", rotation);
    number_property!(engine, "scale", scale);
    number_property!(engine, "width", width);
    number_property!(engine, "height", height);

    engine.register_get("visible", |h: &mut SpriteHandle| h.read(|e| e.visible, false));
    engine.register_set("visible", |h: &mut SpriteHandle, v: bool| h.write(|e| e.visible = v));
    engine.register_get("isGrounded", |h: &mut SpriteHandle| h.read(|e| e.is_grounded(), false));
    engine.register_set("isGrounded", |h: &mut SpriteHandle, v: bool| {
        h.write(|e| e.set_flag("isGrounded", serde_json::Value::Bool(v)))
    });

    engine.register_indexer_get(|h: &mut SpriteHandle, name: ImmutableString| h.flag(&name));
    engine.register_indexer_set(|h: &mut SpriteHandle, name: ImmutableString, v: Dynamic| {
        h.set_flag(&name, v)
    });
}

fn register_canvas_api(engine: &mut Engine) {
    engine.register_type_with_name::<CanvasApi>("CanvasRenderingContext2D");

    engine.register_get("fillStyle", |c: &mut CanvasApi| {
        ImmutableString::from(c.canvas.borrow().fill_style())
    });
    engine.register_set("fillStyle", |c: &mut CanvasApi, v: Dynamic| {
        c.canvas.borrow_mut().set_fill_style(text(&v))
    });
    engine.register_get("strokeStyle", |c: &mut CanvasApi| {
        ImmutableString::from(c.canvas.borrow().stroke_style())
    });
    engine.register_set("strokeStyle", |c: &mut CanvasApi, v: Dynamic| {
        c.canvas.borrow_mut().set_stroke_style(text(&v))
    });
    engine.register_get("font", |c: &mut CanvasApi| {
        ImmutableString::from(c.canvas.borrow().font())
    });
    engine.register_set("font", |c: &mut CanvasApi, v: Dynamic| {
        c.canvas.borrow_mut().set_font(text(&v))
    });
    engine.register_get("lineWidth", |c: &mut CanvasApi| c.canvas.borrow().line_width());
    engine.register_set("lineWidth", |c: &mut CanvasApi, v: Dynamic| {
        c.canvas.borrow_mut().set_line_width(num(&v))
    });
    engine.register_get("globalAlpha", |c: &mut CanvasApi| c.canvas.borrow().global_alpha());
    engine.register_set("globalAlpha", |c: &mut CanvasApi, v: Dynamic| {
        c.canvas.borrow_mut().set_global_alpha(num(&v))
    });

    engine.register_fn(
        "clearRect",
        |c: &mut CanvasApi, x: Dynamic, y: Dynamic, w: Dynamic, h: Dynamic| {
            c.canvas
                .borrow_mut()
                .clear_rect(num(&x), num(&y), num(&w), num(&h))
        },
    );
    engine.register_fn(
        "fillRect",
        |c: &mut CanvasApi, x: Dynamic, y: Dynamic, w: Dynamic, h: Dynamic| {
            c.canvas
                .borrow_mut()
                .fill_rect(num(&x), num(&y), num(&w), num(&h))
        },
    );
    engine.register_fn(
        "strokeRect",
        |c: &mut CanvasApi, x: Dynamic, y: Dynamic, w: Dynamic, h: Dynamic| {
            c.canvas
                .borrow_mut()
                .stroke_rect(num(&x), num(&y), num(&w), num(&h))
        },
    );
    engine.register_fn(
        "fillText",
        |c: &mut CanvasApi, t: Dynamic, x: Dynamic, y: Dynamic| {
            c.canvas.borrow_mut().fill_text(text(&t), num(&x), num(&y))
        },
    );
    engine.register_fn(
        "drawImage",
        |c: &mut CanvasApi, src: Dynamic, x: Dynamic, y: Dynamic| {
            c.canvas
                .borrow_mut()
                .draw_image(text(&src), num(&x), num(&y), None)
        },
    );
    engine.register_fn(
        "drawImage",
        |c: &mut CanvasApi, src: Dynamic, x: Dynamic, y: Dynamic, w: Dynamic, h: Dynamic| {
            c.canvas.borrow_mut().draw_image(
                text(&src),
                num(&x),
                num(&y),
                Some((num(&w), num(&h))),
            )
        },
    );
    engine.register_fn("beginPath", |c: &mut CanvasApi| c.canvas.borrow_mut().begin_path());
    engine.register_fn("closePath", |c: &mut CanvasApi| c.canvas.borrow_mut().close_path());
    engine.register_fn("moveTo", |c: &mut CanvasApi, x: Dynamic, y: Dynamic| {
        c.canvas.borrow_mut().move_to(num(&x), num(&y))
    });
    engine.register_fn("lineTo", |c: &mut CanvasApi, x: Dynamic, y: Dynamic| {
        c.canvas.borrow_mut().line_to(num(&x), num(&y))
    });
    engine.register_fn(
        "arc",
        |c: &mut CanvasApi, x: Dynamic, y: Dynamic, r: Dynamic, start: Dynamic, end: Dynamic| {
            c.canvas
                .borrow_mut()
                .arc(num(&x), num(&y), num(&r), num(&start), num(&end))
        },
    );
    engine.register_fn("fill", |c: &mut CanvasApi| c.canvas.borrow_mut().fill());
    engine.register_fn("stroke", |c: &mut CanvasApi| c.canvas.borrow_mut().stroke());
    engine.register_fn("save", |c: &mut CanvasApi| c.canvas.borrow_mut().save());
    engine.register_fn("restore", |c: &mut CanvasApi| c.canvas.borrow_mut().restore());
    engine.register_fn("resetTransform", |c: &mut CanvasApi| {
        c.canvas.borrow_mut().reset_transform()
    });
    engine.register_fn("translate", |c: &mut CanvasApi, x: Dynamic, y: Dynamic| {
        c.canvas.borrow_mut().translate(num(&x), num(&y))
    });
    engine.register_fn("rotate", |c: &mut CanvasApi, radians: Dynamic| {
        c.canvas.borrow_mut().rotate(num(&radians))
    });
    engine.register_fn("scale", |c: &mut CanvasApi, sx: Dynamic, sy: Dynamic| {
        c.canvas.borrow_mut().scale(num(&sx), num(&sy))
    });
}
