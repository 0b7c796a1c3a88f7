use crate::entity::{EntityKey, EntityStore};

pub const DEFAULT_GRID_SIZE: f64 = 32.0;

/// Explicit Euler step: one call is one tick, the caller picks the rate.
pub fn apply_gravity(store: &mut EntityStore, id: &EntityKey, force: f64) {
    if let Some(e) = store.get_mut(id) {
        e.velocity_y += force;
        e.y += e.velocity_y;
    }
}

/// Sets the velocity and immediately steps the position by it.
pub fn apply_velocity(store: &mut EntityStore, id: &EntityKey, vx: f64, vy: f64) {
    if let Some(e) = store.get_mut(id) {
        e.velocity_x = vx;
        e.velocity_y = vy;
        e.x += vx;
        e.y += vy;
    }
}

pub fn check_collision(store: &EntityStore, a: &EntityKey, b: &EntityKey) -> bool {
    store.intersects(a, b)
}

/// Only fires from the ground and consumes the grounded flag. Restoring it is
/// left to whatever collision step the game script runs.
pub fn platform_jump(store: &mut EntityStore, id: &EntityKey, force: f64) {
    if let Some(e) = store.get_mut(id) {
        if e.is_grounded() {
            e.velocity_y = force;
            e.set_flag("isGrounded", serde_json::Value::Bool(false));
        }
    }
}

pub fn platform_is_grounded(store: &EntityStore, id: &EntityKey) -> bool {
    store.get(id).is_some_and(|e| e.is_grounded())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "up" => Some(Self::Up),
            "down" => Some(Self::Down),
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            _ => None,
        }
    }
}

/// Screen-space step: `up` decreases `y`. No bounds checks against any level
/// grid; callers validate legality first.
pub fn grid_move(store: &mut EntityStore, id: &EntityKey, direction: Direction, grid_size: f64) {
    if let Some(e) = store.get_mut(id) {
        match direction {
            Direction::Up => e.y -= grid_size,
            Direction::Down => e.y += grid_size,
            Direction::Left => e.x -= grid_size,
            Direction::Right => e.x += grid_size,
        }
    }
}

pub fn set_grid_position(
    store: &mut EntityStore,
    id: &EntityKey,
    grid_x: f64,
    grid_y: f64,
    grid_size: f64,
) {
    if let Some(e) = store.get_mut(id) {
        e.x = grid_x * grid_size;
        e.y = grid_y * grid_size;
    }
}

pub fn get_grid_position(store: &EntityStore, id: &EntityKey, grid_size: f64) -> Option<(i64, i64)> {
    store.get(id).map(|e| {
        (
            (e.x / grid_size).floor() as i64,
            (e.y / grid_size).floor() as i64,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(id: &str, x: f64, y: f64) -> EntityStore {
        let mut store = EntityStore::new();
        store.create(id, "img", x, y);
        store
    }

    #[test]
    fn gravity_accumulates_as_discrete_sum() {
        let force = 0.5;
        for n in [1u32, 2, 7, 30] {
            let mut store = store_with("p", 0.0, 0.0);
            let id: EntityKey = "p".into();
            for _ in 0..n {
                apply_gravity(&mut store, &id, force);
            }
            let e = store.get(&id).expect("p");
            let expected_y: f64 = (1..=n).map(|k| k as f64 * force).sum();
            assert!((e.velocity_y - n as f64 * force).abs() < 1e-9);
            assert!((e.y - expected_y).abs() < 1e-9);
        }
    }

    #[test]
    fn apply_velocity_sets_and_steps() {
        let mut store = store_with("player", 0.0, 0.0);
        let id: EntityKey = "player".into();
        apply_velocity(&mut store, &id, 5.0, 0.0);
        let e = store.get(&id).expect("player");
        assert_eq!((e.x, e.y), (5.0, 0.0));
        assert_eq!((e.velocity_x, e.velocity_y), (5.0, 0.0));
    }

    #[test]
    fn jump_requires_and_consumes_grounded_flag() {
        let mut store = store_with("p", 0.0, 100.0);
        let id: EntityKey = "p".into();
        platform_jump(&mut store, &id, -12.0);
        assert_eq!(store.get(&id).map(|e| e.velocity_y), Some(0.0));

        store
            .get_mut(&id)
            .expect("p")
            .set_flag("isGrounded", serde_json::json!(true));
        assert!(platform_is_grounded(&store, &id));
        platform_jump(&mut store, &id, -12.0);
        assert_eq!(store.get(&id).map(|e| e.velocity_y), Some(-12.0));
        assert!(!platform_is_grounded(&store, &id));

        // second jump in the air does nothing
        platform_jump(&mut store, &id, -30.0);
        assert_eq!(store.get(&id).map(|e| e.velocity_y), Some(-12.0));
    }

    #[test]
    fn grid_move_steps_by_cell() {
        let mut store = store_with("p", 64.0, 64.0);
        let id: EntityKey = "p".into();
        grid_move(&mut store, &id, Direction::Up, 32.0);
        grid_move(&mut store, &id, Direction::Right, 32.0);
        let e = store.get(&id).expect("p");
        assert_eq!((e.x, e.y), (96.0, 32.0));
        assert_eq!(Direction::parse("sideways"), None);
    }

    #[test]
    fn grid_position_round_trips() {
        let mut store = store_with("p", 0.0, 0.0);
        let id: EntityKey = "p".into();
        for size in [1.0, 16.0, 32.0, 7.5] {
            for (gx, gy) in [(0i64, 0i64), (3, 4), (-2, 5), (-7, -9), (100, -1)] {
                set_grid_position(&mut store, &id, gx as f64, gy as f64, size);
                assert_eq!(get_grid_position(&store, &id, size), Some((gx, gy)));
            }
        }
    }

    #[test]
    fn grid_read_floors_negative_positions() {
        let store = store_with("p", -1.0, 31.9);
        assert_eq!(
            get_grid_position(&store, &"p".into(), DEFAULT_GRID_SIZE),
            Some((-1, 0))
        );
    }

    #[test]
    fn missing_entities_are_ignored() {
        let mut store = EntityStore::new();
        let ghost: EntityKey = "ghost".into();
        apply_gravity(&mut store, &ghost, 1.0);
        apply_velocity(&mut store, &ghost, 1.0, 1.0);
        platform_jump(&mut store, &ghost, 1.0);
        grid_move(&mut store, &ghost, Direction::Down, 32.0);
        set_grid_position(&mut store, &ghost, 1.0, 1.0, 32.0);
        assert!(!platform_is_grounded(&store, &ghost));
        assert!(!check_collision(&store, &ghost, &ghost));
        assert_eq!(get_grid_position(&store, &ghost, 32.0), None);
        assert!(store.is_empty());
    }
}
