use bevy::log::{debug, info, warn};
use rhai::{Engine, Scope, AST};
use std::cell::RefCell;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::OnceLock;

use crate::canvas::Canvas2d;
use crate::scripting::api::{self, CanvasApi, GameApi, SharedPlayState};
use crate::scripting::js_compat;
use crate::scripting::{ScriptError, ScriptErrors};

struct ScriptLimits {
    max_operations: u64,
    max_call_levels: usize,
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
}

fn script_limits() -> &'static ScriptLimits {
    static LIMITS: OnceLock<ScriptLimits> = OnceLock::new();
    LIMITS.get_or_init(|| ScriptLimits {
        max_operations: env_parse("GAMEQUEST_SCRIPT_MAX_OPERATIONS")
            .unwrap_or(crate::scripting::DEFAULT_SCRIPT_MAX_OPERATIONS)
            .max(10_000),
        max_call_levels: env_parse("GAMEQUEST_SCRIPT_MAX_CALL_LEVELS")
            .unwrap_or(crate::scripting::DEFAULT_SCRIPT_MAX_CALL_LEVELS)
            .max(8),
    })
}

fn make_script_engine() -> Engine {
    let limits = script_limits();
    let mut engine = Engine::new();
    engine.set_max_operations(limits.max_operations);
    engine.set_max_call_levels(limits.max_call_levels);
    engine.on_print(|text| info!("[GameQuest script] {text}"));
    engine.on_debug(|text, source, pos| {
        debug!("[GameQuest script] {} {pos:?}: {text}", source.unwrap_or("node"))
    });
    api::register_game_api(&mut engine);
    js_compat::register_js_helpers(&mut engine);
    engine
}

fn script_hash(source: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    source.hash(&mut hasher);
    hasher.finish()
}

/// The three names a node body sees: `ctx`, `canvas` and `game`.
pub struct ScriptBindings {
    game: GameApi,
    ctx: CanvasApi,
    canvas: Rc<RefCell<Canvas2d>>,
}

impl ScriptBindings {
    pub fn new(state: SharedPlayState, canvas: Rc<RefCell<Canvas2d>>) -> Self {
        Self {
            game: GameApi::new(state),
            ctx: CanvasApi::new(canvas.clone()),
            canvas,
        }
    }

    fn scope(&self) -> Scope<'static> {
        let mut scope = Scope::new();
        scope.push("ctx", self.ctx.clone());
        scope.push("canvas", api::canvas_info(self.canvas.borrow().descriptor()));
        scope.push("game", self.game.clone());
        scope
    }
}

/// Compiles and runs node bodies. Each run gets a fresh scope, so nothing
/// a script declares survives into the next frame.
pub struct ScriptSandbox {
    engine: Engine,
    compiled: HashMap<String, (u64, Result<AST, String>)>,
    errors: ScriptErrors,
    last_fault: HashMap<String, String>,
}

impl Default for ScriptSandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptSandbox {
    pub fn new() -> Self {
        Self {
            engine: make_script_engine(),
            compiled: HashMap::new(),
            errors: ScriptErrors::default(),
            last_fault: HashMap::new(),
        }
    }

    pub fn errors(&self) -> &ScriptErrors {
        &self.errors
    }

    /// Compile without running. Author bodies that fail as-is get one more
    /// try through the JS compatibility rewrite.
    pub fn check(&self, source: &str) -> Result<AST, String> {
        match self.engine.compile(source) {
            Ok(ast) => Ok(ast),
            Err(primary) => match js_compat::transpile_js_compat(source) {
                Some(rewritten) => self
                    .engine
                    .compile(&rewritten)
                    .map_err(|e| format!("{primary}; JS-compat rewrite failed: {e}")),
                None => Err(primary.to_string()),
            },
        }
    }

    /// Drops the cached AST for a node so the next run recompiles.
    pub fn forget(&mut self, node_id: &str) {
        self.compiled.remove(node_id);
        self.last_fault.remove(node_id);
    }

    /// Runs one frame of `source` for `node_id`. Faults are recorded and
    /// returned but never propagate further than the caller's frame.
    pub fn run(
        &mut self,
        frame: u64,
        node_id: &str,
        source: &str,
        bindings: &ScriptBindings,
    ) -> Result<(), String> {
        let hash = script_hash(source);
        let cached = matches!(self.compiled.get(node_id), Some((h, _)) if *h == hash);
        if !cached {
            let compiled = self.check(source);
            if let Err(message) = &compiled {
                self.record(frame, node_id, format!("compile error: {message}"));
            }
            self.compiled.insert(node_id.to_string(), (hash, compiled));
        }
        let ast = match self.compiled.get(node_id) {
            Some((_, Ok(ast))) => ast.clone(),
            Some((_, Err(message))) => return Err(message.clone()),
            None => return Err(format!("node {node_id} has no compiled script")),
        };

        let mut scope = bindings.scope();
        match self.engine.run_ast_with_scope(&mut scope, &ast) {
            Ok(()) => {
                self.last_fault.remove(node_id);
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                self.record(frame, node_id, message.clone());
                Err(message)
            }
        }
    }

    fn record(&mut self, frame: u64, node_id: &str, message: String) {
        // repeated identical faults stay in the buffer but only log once
        if self.last_fault.get(node_id) != Some(&message) {
            warn!("[GameQuest script] node {node_id} frame {frame}: {message}");
            self.last_fault.insert(node_id.to_string(), message.clone());
        }
        self.errors.push(ScriptError {
            node_id: node_id.to_string(),
            error_message: message,
            frame,
        });
    }
}
