//! Player and projectile movement

use super::entity::{flat, EntityState, Rotation, Vec3};

/// Player movement constants
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovementStats {
    /// Ground speed while walking (units/s)
    pub walk_speed: f32,
    pub sprint_speed: f32,
    /// Speed multiplier while aiming down sights
    pub aim_speed_factor: f32,
    /// How fast horizontal velocity approaches the wished velocity (1/s)
    pub acceleration: f32,
    /// Fraction of `acceleration` available while airborne
    pub air_control: f32,
    pub jump_velocity: f32,
    pub gravity: f32,
    /// Half extent of the square arena on X and Z
    pub arena_half_extent: f32,
    /// Fraction of vertical speed a grenade keeps when bouncing
    pub bounce: f32,
    /// Horizontal damping applied to a grenade on each floor contact
    pub ground_friction: f32,
}

impl Default for MovementStats {
    fn default() -> Self {
        Self {
            walk_speed: 5.0,
            sprint_speed: 8.0,
            aim_speed_factor: 0.5,
            acceleration: 12.0,
            air_control: 0.3,
            jump_velocity: 6.0,
            gravity: 20.0,
            arena_half_extent: 50.0,
            bounce: 0.4,
            ground_friction: 0.7,
        }
    }
}

/// Movement input for one tick, already decoded from a command
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MoveIntent {
    pub move_x: f32,
    pub move_y: f32,
    pub sprint: bool,
    pub aim: bool,
    pub jump: bool,
}

/// Physics system for updating entity positions and velocities
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Integrate one player tick on a flat floor at y = 0
    pub fn update_player(state: &mut EntityState, intent: &MoveIntent, stats: &MovementStats, dt: f32) {
        let move_x = intent.move_x.clamp(-1.0, 1.0);
        let move_y = intent.move_y.clamp(-1.0, 1.0);

        let mut wish = Self::wish_direction(state.rotation, move_x, move_y);
        if wish.length_squared() > 1.0 {
            wish = wish.normalize_or_zero();
        }

        // Sprinting only counts while moving forward and not aiming
        let mut speed = if intent.sprint && move_y > 0.0 && !intent.aim {
            stats.sprint_speed
        } else {
            stats.walk_speed
        };
        if intent.aim {
            speed *= stats.aim_speed_factor;
        }

        let target = wish * speed;
        let control = if state.grounded { 1.0 } else { stats.air_control };
        let blend = (stats.acceleration * control * dt).min(1.0);
        let horizontal = flat(state.velocity);
        let horizontal = horizontal + (target - horizontal) * blend;

        let mut vertical = state.velocity.y;
        if intent.jump && state.grounded {
            vertical = stats.jump_velocity;
            state.grounded = false;
        }
        if !state.grounded {
            vertical -= stats.gravity * dt;
        }

        state.velocity = Vec3::new(horizontal.x, vertical, horizontal.z);
        state.position += state.velocity * dt;

        if state.position.y <= 0.0 {
            state.position.y = 0.0;
            state.velocity.y = 0.0;
            state.grounded = true;
        }

        Self::clamp_to_arena(state, stats.arena_half_extent);
    }

    /// Ballistic step with floor bounces
    pub fn update_projectile(state: &mut EntityState, stats: &MovementStats, dt: f32) {
        state.velocity.y -= stats.gravity * dt;
        state.position += state.velocity * dt;

        if state.position.y <= 0.0 {
            state.position.y = 0.0;
            state.velocity.y = -state.velocity.y * stats.bounce;
            state.velocity.x *= stats.ground_friction;
            state.velocity.z *= stats.ground_friction;
            // Settle instead of micro-bouncing forever
            if state.velocity.y < stats.gravity * dt {
                state.velocity.y = 0.0;
                state.grounded = true;
            }
        }

        Self::clamp_to_arena(state, stats.arena_half_extent);
    }

    /// Check if a point is inside the arena
    pub fn is_in_arena(position: Vec3, half_extent: f32) -> bool {
        position.x.abs() <= half_extent && position.z.abs() <= half_extent
    }

    fn wish_direction(rotation: Rotation, move_x: f32, move_y: f32) -> Vec3 {
        rotation.flat_forward() * move_y + rotation.flat_right() * move_x
    }

    fn clamp_to_arena(state: &mut EntityState, half_extent: f32) {
        if state.position.x.abs() > half_extent {
            state.position.x = state.position.x.clamp(-half_extent, half_extent);
            state.velocity.x = 0.0;
        }
        if state.position.z.abs() > half_extent {
            state.position.z = state.position.z.clamp(-half_extent, half_extent);
            state.velocity.z = 0.0;
        }
    }
}
