use bevy::math::Affine2;
use bevy::prelude::*;
use bevy::sprite::Anchor;
use std::collections::HashMap;

use crate::canvas::DrawCommand;
use crate::runtime_plugin::{FrameCommands, PlaySurface};

const LAYER_STEP: f32 = 0.001;

/// Windowed presenter: replays the latest frame's draw commands with
/// sprites, 2D text and gizmo outlines.
pub struct RenderPlugin;

impl Plugin for RenderPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<ImageCache>()
            .add_systems(Startup, spawn_canvas_camera)
            .add_systems(Update, (rebuild_presented_frame, draw_frame_outlines));
    }
}

#[derive(Component)]
struct Presented;

#[derive(Resource, Default)]
struct ImageCache(HashMap<String, Handle<Image>>);

fn spawn_canvas_camera(mut commands: Commands) {
    commands.spawn((Camera2d, Transform::from_xyz(0.0, 0.0, 100.0)));
}

/// Canvas pixels (origin top-left, y down) to world units centred on the
/// surface with y up.
pub fn canvas_to_world(surface: &PlaySurface, point: Vec2) -> Vec2 {
    let half = Vec2::new(surface.0.width as f32, surface.0.height as f32) / 2.0;
    Vec2::new(point.x - half.x, half.y - point.y)
}

/// Splits a canvas transform into rotation (radians, canvas orientation)
/// and per-axis scale.
pub fn decompose(transform: &Affine2) -> (f32, Vec2) {
    let x_axis = transform.matrix2.x_axis;
    let y_axis = transform.matrix2.y_axis;
    (x_axis.y.atan2(x_axis.x), Vec2::new(x_axis.length(), y_axis.length()))
}

fn world_transform(surface: &PlaySurface, transform: &Affine2, anchor_point: Vec2, z: f32) -> Transform {
    let (angle, scale) = decompose(transform);
    let origin = canvas_to_world(surface, transform.transform_point2(anchor_point));
    Transform {
        translation: origin.extend(z),
        rotation: Quat::from_rotation_z(-angle),
        scale: scale.extend(1.0),
    }
}

fn rebuild_presented_frame(
    mut commands: Commands,
    frame: Res<FrameCommands>,
    surface: Res<PlaySurface>,
    asset_server: Res<AssetServer>,
    mut images: ResMut<ImageCache>,
    presented: Query<Entity, With<Presented>>,
) {
    if !frame.is_changed() {
        return;
    }
    for entity in presented.iter() {
        commands.entity(entity).despawn();
    }

    for (index, command) in frame.commands.iter().enumerate() {
        let z = index as f32 * LAYER_STEP;
        match command {
            DrawCommand::FillRect {
                x,
                y,
                width,
                height,
                transform,
                color,
                alpha,
            } => {
                let Some(color) = css_color(color, *alpha) else {
                    continue;
                };
                let corner = Vec2::new(*x as f32, *y as f32);
                commands.spawn((
                    Presented,
                    Sprite {
                        color,
                        custom_size: Some(Vec2::new(*width as f32, *height as f32)),
                        anchor: Anchor::TopLeft,
                        ..default()
                    },
                    world_transform(&surface, transform, corner, z),
                ));
            }
            DrawCommand::Image {
                source,
                x,
                y,
                size,
                transform,
                alpha,
            } => {
                let handle = images
                    .0
                    .entry(source.clone())
                    .or_insert_with(|| asset_server.load(source.clone()))
                    .clone();
                let mut sprite = Sprite::from_image(handle);
                sprite.anchor = Anchor::TopLeft;
                sprite.custom_size = size.map(|(w, h)| Vec2::new(w as f32, h as f32));
                sprite.color = Color::srgba(1.0, 1.0, 1.0, alpha.clamp(0.0, 1.0) as f32);
                commands.spawn((
                    Presented,
                    sprite,
                    world_transform(&surface, transform, Vec2::new(*x as f32, *y as f32), z),
                ));
            }
            DrawCommand::Text {
                text,
                x,
                y,
                transform,
                color,
                font,
                alpha,
            } => {
                let Some(color) = css_color(color, *alpha) else {
                    continue;
                };
                commands.spawn((
                    Presented,
                    Text2d::new(text.clone()),
                    TextFont {
                        font_size: font_px(font),
                        ..default()
                    },
                    TextColor(color),
                    Anchor::BottomLeft,
                    world_transform(&surface, transform, Vec2::new(*x as f32, *y as f32), z),
                ));
            }
            _ => {}
        }
    }
}

/// Outlines and paths are immediate mode, so they are redrawn every frame.
fn draw_frame_outlines(frame: Res<FrameCommands>, surface: Res<PlaySurface>, mut gizmos: Gizmos) {
    for command in &frame.commands {
        match command {
            DrawCommand::StrokeRect {
                x,
                y,
                width,
                height,
                transform,
                color,
                alpha,
                ..
            } => {
                let Some(color) = css_color(color, *alpha) else {
                    continue;
                };
                let (x, y, w, h) = (*x as f32, *y as f32, *width as f32, *height as f32);
                let corners = [
                    Vec2::new(x, y),
                    Vec2::new(x + w, y),
                    Vec2::new(x + w, y + h),
                    Vec2::new(x, y + h),
                    Vec2::new(x, y),
                ];
                gizmos.linestrip_2d(
                    corners
                        .into_iter()
                        .map(|p| canvas_to_world(&surface, transform.transform_point2(p))),
                    color,
                );
            }
            DrawCommand::StrokePath {
                points,
                closed,
                color,
                alpha,
                ..
            } => draw_polyline(&mut gizmos, &surface, points, *closed, color, *alpha),
            DrawCommand::FillPath {
                points,
                color,
                alpha,
            } => draw_polyline(&mut gizmos, &surface, points, true, color, *alpha),
            _ => {}
        }
    }
}

fn draw_polyline(
    gizmos: &mut Gizmos,
    surface: &PlaySurface,
    points: &[Vec2],
    closed: bool,
    color: &str,
    alpha: f64,
) {
    let Some(color) = css_color(color, alpha) else {
        return;
    };
    let Some(first) = points.first() else {
        return;
    };
    let mut line: Vec<Vec2> = points.iter().map(|p| canvas_to_world(surface, *p)).collect();
    if closed {
        line.push(canvas_to_world(surface, *first));
    }
    gizmos.linestrip_2d(line, color);
}

/// Pixel size from a CSS font shorthand such as `"bold 16px Arial"`.
pub fn font_px(font: &str) -> f32 {
    font.split_whitespace()
        .find_map(|part| part.strip_suffix("px").and_then(|n| n.parse::<f32>().ok()))
        .unwrap_or(10.0)
}

/// Parses the CSS colour forms scripts use (`#rgb`, `#rrggbb`, `#rrggbbaa`,
/// `rgb()`, `rgba()` and common names) and folds in `globalAlpha`.
pub fn css_color(value: &str, alpha: f64) -> Option<Color> {
    let value = value.trim().to_ascii_lowercase();
    let base = if value.starts_with('#') {
        Srgba::hex(&value[1..]).ok()?
    } else if let Some(args) = value
        .strip_prefix("rgba(")
        .or_else(|| value.strip_prefix("rgb("))
        .and_then(|rest| rest.strip_suffix(')'))
    {
        let parts: Vec<f32> = args
            .split(',')
            .map(|p| p.trim().parse::<f32>())
            .collect::<Result<_, _>>()
            .ok()?;
        match parts.as_slice() {
            [r, g, b] => Srgba::rgb_u8(*r as u8, *g as u8, *b as u8),
            [r, g, b, a] => Srgba::rgb_u8(*r as u8, *g as u8, *b as u8).with_alpha(*a),
            _ => return None,
        }
    } else {
        named_color(&value)?
    };
    let alpha = base.alpha * alpha.clamp(0.0, 1.0) as f32;
    Some(Color::Srgba(base.with_alpha(alpha)))
}

fn named_color(name: &str) -> Option<Srgba> {
    let (r, g, b) = match name {
        "black" => (0, 0, 0),
        "white" => (255, 255, 255),
        "red" => (255, 0, 0),
        "green" => (0, 128, 0),
        "lime" => (0, 255, 0),
        "blue" => (0, 0, 255),
        "yellow" => (255, 255, 0),
        "orange" => (255, 165, 0),
        "purple" => (128, 0, 128),
        "pink" => (255, 192, 203),
        "brown" => (165, 42, 42),
        "cyan" | "aqua" => (0, 255, 255),
        "magenta" | "fuchsia" => (255, 0, 255),
        "gray" | "grey" => (128, 128, 128),
        "silver" => (192, 192, 192),
        "navy" => (0, 0, 128),
        "gold" => (255, 215, 0),
        "transparent" => return Some(Srgba::NONE),
        _ => return None,
    };
    Some(Srgba::rgb_u8(r, g, b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::CanvasDescriptor;

    #[test]
    fn parses_css_colours() {
        assert_eq!(css_color("#ff0000", 1.0), Some(Color::srgb(1.0, 0.0, 0.0)));
        assert_eq!(css_color("#FFF", 1.0), Some(Color::srgb(1.0, 1.0, 1.0)));
        assert_eq!(css_color("rgb(0, 0, 255)", 1.0), Some(Color::srgb(0.0, 0.0, 1.0)));
        assert_eq!(css_color("Black", 0.5), Some(Color::srgba(0.0, 0.0, 0.0, 0.5)));
        let faded = css_color("rgba(255, 255, 255, 0.5)", 0.5).expect("rgba");
        assert!((faded.alpha() - 0.25).abs() < 1e-6);
        assert_eq!(css_color("not-a-colour", 1.0), None);
        assert_eq!(css_color("#12", 1.0), None);
    }

    #[test]
    fn canvas_origin_maps_to_top_left_of_the_view() {
        let surface = PlaySurface(CanvasDescriptor {
            width: 200.0,
            height: 100.0,
        });
        assert_eq!(canvas_to_world(&surface, Vec2::ZERO), Vec2::new(-100.0, 50.0));
        assert_eq!(canvas_to_world(&surface, Vec2::new(200.0, 100.0)), Vec2::new(100.0, -50.0));
    }

    #[test]
    fn decomposes_canvas_transforms() {
        let transform = Affine2::from_scale_angle_translation(
            Vec2::new(2.0, 3.0),
            std::f32::consts::FRAC_PI_2,
            Vec2::new(5.0, 5.0),
        );
        let (angle, scale) = decompose(&transform);
        assert!((angle - std::f32::consts::FRAC_PI_2).abs() < 1e-5);
        assert!((scale - Vec2::new(2.0, 3.0)).length() < 1e-5);
    }

    #[test]
    fn reads_font_pixel_size() {
        assert_eq!(font_px("bold 24px Arial"), 24.0);
        assert_eq!(font_px("serif"), 10.0);
    }
}
