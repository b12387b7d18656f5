//! Targets and the spawn policy

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::seat::Side;

/// Edge length of a target in pixels
pub const TARGET_SIZE: f32 = 60.0;

/// Glyphs a target may be drawn with
pub const EMOJIS: [&str; 10] = ["🎯", "⭐", "💎", "🎁", "🏆", "🔥", "⚡", "🌟", "💫", "🎪"];

/// A transient clickable object on one side of the arena
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: Uuid,
    pub side: Side,
    pub x: f32,
    pub y: f32,
    pub emoji: String,
    /// Score awarded on hit (1-3)
    pub points: u32,
    /// Unix millis at spawn
    pub created_at: u64,
}

impl Target {
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.created_at)
    }

    pub fn is_expired(&self, now_ms: u64, lifetime_ms: u64) -> bool {
        self.age_ms(now_ms) >= lifetime_ms
    }
}

/// Size of one half of the arena, in pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContainerDimensions {
    pub width: f32,
    pub height: f32,
}

impl ContainerDimensions {
    /// Arena size for a client viewport width (responsive breakpoints)
    pub fn for_viewport(viewport_width: Option<u32>) -> Self {
        match viewport_width {
            Some(w) if w >= 1024 => Self { width: 450.0, height: 500.0 },
            Some(w) if w >= 768 => Self { width: 300.0, height: 350.0 },
            Some(_) => Self { width: 280.0, height: 320.0 },
            None => Self::default(),
        }
    }
}

impl Default for ContainerDimensions {
    fn default() -> Self {
        Self {
            width: 350.0,
            height: 400.0,
        }
    }
}

/// Seeded source of new targets
pub struct TargetSpawner {
    rng: ChaCha8Rng,
}

impl TargetSpawner {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Roll whether a side gets a target this spawn tick
    pub fn should_spawn(&mut self, probability: f64) -> bool {
        self.rng.gen_bool(probability.clamp(0.0, 1.0))
    }

    /// Create a target positioned fully inside the container
    pub fn spawn(&mut self, side: Side, container: ContainerDimensions, now_ms: u64) -> Target {
        let max_x = (container.width - TARGET_SIZE).max(0.0);
        let max_y = (container.height - TARGET_SIZE).max(0.0);

        Target {
            id: Uuid::from_u128(self.rng.gen()),
            side,
            x: self.rng.gen::<f32>() * max_x,
            y: self.rng.gen::<f32>() * max_y,
            emoji: EMOJIS[self.rng.gen_range(0..EMOJIS.len())].to_string(),
            points: self.rng.gen_range(1..=3),
            created_at: now_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewport_breakpoints() {
        assert_eq!(
            ContainerDimensions::for_viewport(Some(1280)),
            ContainerDimensions { width: 450.0, height: 500.0 }
        );
        assert_eq!(
            ContainerDimensions::for_viewport(Some(800)),
            ContainerDimensions { width: 300.0, height: 350.0 }
        );
        assert_eq!(
            ContainerDimensions::for_viewport(Some(390)),
            ContainerDimensions { width: 280.0, height: 320.0 }
        );
        assert_eq!(
            ContainerDimensions::for_viewport(None),
            ContainerDimensions { width: 350.0, height: 400.0 }
        );
    }

    #[test]
    fn test_spawned_targets_stay_in_bounds() {
        let mut spawner = TargetSpawner::new(42);
        let container = ContainerDimensions::for_viewport(Some(390));

        for _ in 0..500 {
            let t = spawner.spawn(Side::Right, container, 1_000);
            assert!(t.x >= 0.0 && t.x <= container.width - TARGET_SIZE);
            assert!(t.y >= 0.0 && t.y <= container.height - TARGET_SIZE);
            assert!((1..=3).contains(&t.points));
            assert!(EMOJIS.contains(&t.emoji.as_str()));
            assert_eq!(t.side, Side::Right);
            assert_eq!(t.created_at, 1_000);
        }
    }

    #[test]
    fn test_tiny_container_pins_targets_to_origin() {
        let mut spawner = TargetSpawner::new(1);
        let t = spawner.spawn(
            Side::Left,
            ContainerDimensions { width: 40.0, height: 40.0 },
            0,
        );
        assert_eq!((t.x, t.y), (0.0, 0.0));
    }

    #[test]
    fn test_same_seed_same_targets() {
        let container = ContainerDimensions::default();
        let a = TargetSpawner::new(7).spawn(Side::Left, container, 5);
        let b = TargetSpawner::new(7).spawn(Side::Left, container, 5);
        assert_eq!(a, b);
    }

    #[test]
    fn test_expiry_at_lifetime() {
        let mut t = TargetSpawner::new(3).spawn(Side::Left, ContainerDimensions::default(), 10_000);
        assert!(!t.is_expired(14_999, 5_000));
        assert!(t.is_expired(15_000, 5_000));

        // Clock skew never underflows
        t.created_at = 20_000;
        assert_eq!(t.age_ms(10_000), 0);
    }
}
