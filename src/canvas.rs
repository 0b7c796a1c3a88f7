use bevy::math::{Affine2, Vec2};
use serde::{Deserialize, Serialize};

use crate::assets::SpriteRegistry;
use crate::entity::EntityStore;

/// Line segments used to approximate a full circle for `arc`.
const ARC_SEGMENTS: usize = 32;

/// Size of the mounted drawing surface, in canvas pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CanvasDescriptor {
    pub width: f64,
    pub height: f64,
}

impl Default for CanvasDescriptor {
    fn default() -> Self {
        Self {
            width: 960.0,
            height: 540.0,
        }
    }
}

/// One recorded draw call. Geometry is in canvas pixels (origin top-left,
/// y down); `transform` maps local coordinates onto the canvas.
#[derive(Clone, Debug, PartialEq)]
pub enum DrawCommand {
    Clear {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },
    FillRect {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        transform: Affine2,
        color: String,
        alpha: f64,
    },
    StrokeRect {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        transform: Affine2,
        color: String,
        line_width: f64,
        alpha: f64,
    },
    Text {
        text: String,
        x: f64,
        y: f64,
        transform: Affine2,
        color: String,
        font: String,
        alpha: f64,
    },
    Image {
        source: String,
        x: f64,
        y: f64,
        size: Option<(f64, f64)>,
        transform: Affine2,
        alpha: f64,
    },
    /// Path points are already in canvas space.
    FillPath {
        points: Vec<Vec2>,
        color: String,
        alpha: f64,
    },
    StrokePath {
        points: Vec<Vec2>,
        closed: bool,
        color: String,
        line_width: f64,
        alpha: f64,
    },
}

#[derive(Clone, Debug)]
struct DrawState {
    transform: Affine2,
    fill_style: String,
    stroke_style: String,
    line_width: f64,
    font: String,
    global_alpha: f64,
}

impl Default for DrawState {
    fn default() -> Self {
        Self {
            transform: Affine2::IDENTITY,
            fill_style: "#000000".to_string(),
            stroke_style: "#000000".to_string(),
            line_width: 1.0,
            font: "10px sans-serif".to_string(),
            global_alpha: 1.0,
        }
    }
}

#[derive(Clone, Debug, Default)]
struct SubPath {
    points: Vec<Vec2>,
    closed: bool,
}

/// Recording 2D context with the canvas-API subset scripts draw with.
/// Hosts replay [`Canvas2d::commands`] onto a real surface after each tick.
#[derive(Clone, Debug)]
pub struct Canvas2d {
    descriptor: CanvasDescriptor,
    state: DrawState,
    stack: Vec<DrawState>,
    path: Vec<SubPath>,
    commands: Vec<DrawCommand>,
}

impl Canvas2d {
    pub fn new(descriptor: CanvasDescriptor) -> Self {
        Self {
            descriptor,
            state: DrawState::default(),
            stack: Vec::new(),
            path: Vec::new(),
            commands: Vec::new(),
        }
    }

    pub fn descriptor(&self) -> CanvasDescriptor {
        self.descriptor
    }

    pub fn resize(&mut self, descriptor: CanvasDescriptor) {
        self.descriptor = descriptor;
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    /// A clear covering the whole surface under the identity transform
    /// discards everything recorded so far.
    pub fn clear_rect(&mut self, x: f64, y: f64, width: f64, height: f64) {
        let covers_surface = self.state.transform == Affine2::IDENTITY
            && x <= 0.0
            && y <= 0.0
            && x + width >= self.descriptor.width
            && y + height >= self.descriptor.height;
        if covers_surface {
            self.commands.clear();
        } else {
            self.commands.push(DrawCommand::Clear {
                x,
                y,
                width,
                height,
            });
        }
    }

    pub fn save(&mut self) {
        self.stack.push(self.state.clone());
    }

    /// Unbalanced restores are ignored, as on a browser canvas.
    pub fn restore(&mut self) {
        if let Some(prev) = self.stack.pop() {
            self.state = prev;
        }
    }

    pub fn translate(&mut self, x: f64, y: f64) {
        self.state.transform =
            self.state.transform * Affine2::from_translation(Vec2::new(x as f32, y as f32));
    }

    pub fn rotate(&mut self, radians: f64) {
        self.state.transform = self.state.transform * Affine2::from_angle(radians as f32);
    }

    pub fn scale(&mut self, sx: f64, sy: f64) {
        self.state.transform =
            self.state.transform * Affine2::from_scale(Vec2::new(sx as f32, sy as f32));
    }

    pub fn reset_transform(&mut self) {
        self.state.transform = Affine2::IDENTITY;
    }

    pub fn transform(&self) -> Affine2 {
        self.state.transform
    }

    pub fn fill_style(&self) -> &str {
        &self.state.fill_style
    }

    pub fn set_fill_style(&mut self, style: impl Into<String>) {
        self.state.fill_style = style.into();
    }

    pub fn stroke_style(&self) -> &str {
        &self.state.stroke_style
    }

    pub fn set_stroke_style(&mut self, style: impl Into<String>) {
        self.state.stroke_style = style.into();
    }

    pub fn line_width(&self) -> f64 {
        self.state.line_width
    }

    pub fn set_line_width(&mut self, width: f64) {
        if width.is_finite() && width > 0.0 {
            self.state.line_width = width;
        }
    }

    pub fn font(&self) -> &str {
        &self.state.font
    }

    pub fn set_font(&mut self, font: impl Into<String>) {
        self.state.font = font.into();
    }

    pub fn global_alpha(&self) -> f64 {
        self.state.global_alpha
    }

    pub fn set_global_alpha(&mut self, alpha: f64) {
        if (0.0..=1.0).contains(&alpha) {
            self.state.global_alpha = alpha;
        }
    }

    pub fn fill_rect(&mut self, x: f64, y: f64, width: f64, height: f64) {
        self.commands.push(DrawCommand::FillRect {
            x,
            y,
            width,
            height,
            transform: self.state.transform,
            color: self.state.fill_style.clone(),
            alpha: self.state.global_alpha,
        });
    }

    pub fn stroke_rect(&mut self, x: f64, y: f64, width: f64, height: f64) {
        self.commands.push(DrawCommand::StrokeRect {
            x,
            y,
            width,
            height,
            transform: self.state.transform,
            color: self.state.stroke_style.clone(),
            line_width: self.state.line_width,
            alpha: self.state.global_alpha,
        });
    }

    pub fn fill_text(&mut self, text: impl Into<String>, x: f64, y: f64) {
        self.commands.push(DrawCommand::Text {
            text: text.into(),
            x,
            y,
            transform: self.state.transform,
            color: self.state.fill_style.clone(),
            font: self.state.font.clone(),
            alpha: self.state.global_alpha,
        });
    }

    /// `source` is an already-resolved image url.
    pub fn draw_image(&mut self, source: impl Into<String>, x: f64, y: f64, size: Option<(f64, f64)>) {
        self.commands.push(DrawCommand::Image {
            source: source.into(),
            x,
            y,
            size,
            transform: self.state.transform,
            alpha: self.state.global_alpha,
        });
    }

    pub fn begin_path(&mut self) {
        self.path.clear();
    }

    pub fn move_to(&mut self, x: f64, y: f64) {
        let p = self.to_canvas(x, y);
        self.path.push(SubPath {
            points: vec![p],
            closed: false,
        });
    }

    pub fn line_to(&mut self, x: f64, y: f64) {
        let p = self.to_canvas(x, y);
        match self.path.last_mut() {
            Some(sub) if !sub.closed => sub.points.push(p),
            _ => self.path.push(SubPath {
                points: vec![p],
                closed: false,
            }),
        }
    }

    pub fn arc(&mut self, cx: f64, cy: f64, radius: f64, start: f64, end: f64) {
        if !(radius.is_finite() && radius >= 0.0) {
            return;
        }
        let sweep = (end - start).clamp(-std::f64::consts::TAU, std::f64::consts::TAU);
        let steps = ((sweep.abs() / std::f64::consts::TAU) * ARC_SEGMENTS as f64)
            .ceil()
            .max(1.0) as usize;
        for i in 0..=steps {
            let a = start + sweep * (i as f64 / steps as f64);
            self.line_to(cx + radius * a.cos(), cy + radius * a.sin());
        }
    }

    pub fn close_path(&mut self) {
        if let Some(sub) = self.path.last_mut() {
            sub.closed = true;
        }
    }

    pub fn fill(&mut self) {
        for sub in &self.path {
            if sub.points.len() >= 3 {
                self.commands.push(DrawCommand::FillPath {
                    points: sub.points.clone(),
                    color: self.state.fill_style.clone(),
                    alpha: self.state.global_alpha,
                });
            }
        }
    }

    pub fn stroke(&mut self) {
        for sub in &self.path {
            if sub.points.len() >= 2 {
                self.commands.push(DrawCommand::StrokePath {
                    points: sub.points.clone(),
                    closed: sub.closed,
                    color: self.state.stroke_style.clone(),
                    line_width: self.state.line_width,
                    alpha: self.state.global_alpha,
                });
            }
        }
    }

    fn to_canvas(&self, x: f64, y: f64) -> Vec2 {
        self.state
            .transform
            .transform_point2(Vec2::new(x as f32, y as f32))
    }
}

/// Draws every visible sprite whose image resolves, in creation order.
/// Sprites with unknown images are skipped without error.
pub fn render_sprites(canvas: &mut Canvas2d, store: &EntityStore, sprites: &SpriteRegistry) -> usize {
    let mut drawn = 0;
    for entity in store.iter().filter(|e| e.visible) {
        let Some(url) = sprites.resolve(&entity.image_ref) else {
            continue;
        };
        // 0 and NaN fall back the same way a falsy `||` default would
        let scale = if entity.scale == 0.0 || entity.scale.is_nan() {
            1.0
        } else {
            entity.scale
        };
        let rotation = if entity.rotation.is_nan() {
            0.0
        } else {
            entity.rotation
        };
        canvas.save();
        canvas.translate(entity.x, entity.y);
        canvas.rotate(rotation.to_radians());
        canvas.scale(scale, scale);
        canvas.draw_image(url, 0.0, 0.0, None);
        canvas.restore();
        drawn += 1;
    }
    drawn
}
