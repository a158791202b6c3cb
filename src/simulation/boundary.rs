use enum_dispatch::enum_dispatch;

use crate::{floating_type_mod::FT, simulation_parameters::BoundaryType, V3};

/// Velocity factor applied when a particle hits a bouncing wall.
pub const BOUNCE_DAMPING: FT = -0.5;

/// Clamps `position` to `[-half_extent, half_extent]` on every axis and
/// returns which axes were clamped.
#[inline(always)]
pub fn clamp_to_domain(position: &mut V3, half_extent: FT) -> [bool; 3] {
    let mut clamped = [false; 3];
    for d in 0..3 {
        let c = position[d].clamp(-half_extent, half_extent);
        if c != position[d] {
            position[d] = c;
            clamped[d] = true;
        }
    }
    clamped
}

#[enum_dispatch]
pub trait WallHandler {
    /// Applies the wall policy to a committed particle state.
    fn confine(&self, position: &mut V3, velocity: &mut V3);

    /// Applied to the predicted position of fluid particles after commit.
    #[allow(unused_variables)]
    fn confine_predicted(&self, predicted: &mut V3) {}
}

/// Walls that clamp particles back into the domain and reflect their
/// velocity with damping.
#[derive(Debug, Clone, Copy)]
pub struct BouncingWalls {
    pub half_extent: FT,
}

impl WallHandler for BouncingWalls {
    #[inline(always)]
    fn confine(&self, position: &mut V3, velocity: &mut V3) {
        let clamped = clamp_to_domain(position, self.half_extent);
        if clamped.iter().any(|&c| c) {
            *velocity *= BOUNCE_DAMPING;
        }
    }

    #[inline(always)]
    fn confine_predicted(&self, predicted: &mut V3) {
        clamp_to_domain(predicted, self.half_extent);
    }
}

/**
 * Walls that move particles leaving the domain to the opposite wall.
 *
 * The position is clamped first and then negated on every axis where the
 * clamp triggered, so a particle leaving through `+h` reappears exactly at
 * `-h`. This is a reflection of the clamped coordinate rather than a
 * periodic wrap; the overshoot beyond the wall is dropped.
 */
#[derive(Debug, Clone, Copy)]
pub struct CyclicWalls {
    pub half_extent: FT,
}

impl WallHandler for CyclicWalls {
    #[inline(always)]
    fn confine(&self, position: &mut V3, _velocity: &mut V3) {
        let clamped = clamp_to_domain(position, self.half_extent);
        for d in 0..3 {
            if clamped[d] {
                position[d] = -position[d];
            }
        }
    }
}

#[enum_dispatch(WallHandler)]
#[derive(Debug, Clone, Copy)]
pub enum Walls {
    BouncingWalls,
    CyclicWalls,
}

impl Walls {
    pub fn new(boundary: BoundaryType, half_extent: FT) -> Self {
        match boundary {
            BoundaryType::BouncingWall => BouncingWalls { half_extent }.into(),
            BoundaryType::CyclicWall => CyclicWalls { half_extent }.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vec3f;

    #[test]
    fn bouncing_wall_clamps_and_reflects() {
        let walls = Walls::new(BoundaryType::BouncingWall, 10.);
        let mut position = vec3f(10.4, 2., -3.);
        let mut velocity = vec3f(1.5, 0.5, -0.25);
        walls.confine(&mut position, &mut velocity);

        assert_eq!(position, vec3f(10., 2., -3.));
        assert_eq!(velocity, vec3f(-0.75, -0.25, 0.125));
    }

    #[test]
    fn bouncing_wall_leaves_inside_particles_alone() {
        let walls = Walls::new(BoundaryType::BouncingWall, 10.);
        let mut position = vec3f(9.9, -10., 0.);
        let mut velocity = vec3f(1., 1., 1.);
        walls.confine(&mut position, &mut velocity);

        assert_eq!(position, vec3f(9.9, -10., 0.));
        assert_eq!(velocity, vec3f(1., 1., 1.));
    }

    #[test]
    fn bouncing_wall_clamps_predicted_positions() {
        let walls = Walls::new(BoundaryType::BouncingWall, 2.);
        let mut predicted = vec3f(-2.5, 0., 3.);
        walls.confine_predicted(&mut predicted);
        assert_eq!(predicted, vec3f(-2., 0., 2.));
    }

    #[test]
    fn cyclic_wall_moves_particles_to_the_opposite_side() {
        let walls = Walls::new(BoundaryType::CyclicWall, 5.);
        let mut position = vec3f(5.3, 1., -6.);
        let mut velocity = vec3f(1., 0., -1.);
        walls.confine(&mut position, &mut velocity);

        assert_eq!(position, vec3f(-5., 1., 5.));
        assert_eq!(velocity, vec3f(1., 0., -1.));

        let mut predicted = vec3f(7., 0., 0.);
        walls.confine_predicted(&mut predicted);
        assert_eq!(predicted, vec3f(7., 0., 0.));
    }
}
