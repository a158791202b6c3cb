use std::fmt::{self, Display};

use enum_dispatch::enum_dispatch;
use log::info;
use num_traits::Float;
use rand::Rng;

use crate::{
    boids::BoidsSimulation,
    floating_type_mod::FT,
    pbf::FluidSimulation,
    simulation_parameters::{Dimension, InitialLayout, ModelType, SimulationParams, TargetParams, ValidationError},
    vec3f, V3,
};

/**
 * Interface of a particle model towards its driver.
 *
 * Buffers returned by the accessors are sized to the active particle count
 * and are only valid between steps.
 */
#[enum_dispatch]
pub trait ParticleModel {
    /// Advance the simulation by one tick of length `dt` (in frames).
    fn step(&mut self, dt: FT);

    /// Reinitialize `num_particles` particles with the configured initial
    /// layout and zero velocity.
    fn reset(&mut self, num_particles: usize) -> Result<(), ValidationError>;

    fn positions(&self) -> &[V3];

    fn velocities(&self) -> &[V3];

    /// Per-particle scalar for color mapping, if the model has one.
    fn scalar_field(&self) -> Option<&[FT]>;

    fn num_particles(&self) -> usize;

    #[allow(unused_variables)]
    fn set_target(&mut self, target: TargetParams) {}

    fn statistics(&self) -> Result<String, fmt::Error>;
}

#[enum_dispatch(ParticleModel)]
pub enum Simulation {
    FluidSimulation,
    BoidsSimulation,
}

pub fn init_simulation(params: SimulationParams, counters_enabled: bool) -> Result<Simulation, ValidationError> {
    info!(
        "init {:?} simulation in {:?}: {} of {} particles, grid {}^3, domain +-{}",
        params.model,
        params.dimension,
        params.num_particles,
        params.max_particles,
        params.grid_resolution,
        params.wall_position
    );

    Ok(match params.model {
        ModelType::Fluids => FluidSimulation::new(params, counters_enabled)?.into(),
        ModelType::Boids => BoidsSimulation::new(params, counters_enabled)?.into(),
    })
}

/// Initial positions of `num_particles` particles for the configured layout.
pub fn generate_initial_positions(
    params: &SimulationParams,
    num_particles: usize,
    rng: &mut impl Rng,
) -> Result<Vec<V3>, ValidationError> {
    match params.initial_layout {
        InitialLayout::Random => {
            let h = params.wall_position;
            Ok((0..num_particles)
                .map(|_| {
                    let x = match params.dimension {
                        Dimension::Dim3D => rng.gen_range(-h..h),
                        Dimension::Dim2D => 0.,
                    };
                    vec3f(x, rng.gen_range(-h..h), rng.gen_range(-h..h))
                })
                .collect())
        }
        InitialLayout::Block { min, max, spacing } => {
            let counts = lattice_counts(min, max, spacing, params.dimension);
            let lattice_points = counts.iter().fold(1usize, |acc, &c| acc.saturating_mul(c));
            if lattice_points < num_particles {
                return Err(ValidationError::BlockTooSmall {
                    lattice_points,
                    requested: num_particles,
                });
            }
            let mut positions = Vec::with_capacity(num_particles);
            add_block(min, spacing, counts, params.dimension, num_particles, &mut positions);
            Ok(positions)
        }
    }
}

/// Number of lattice points `min + k * spacing` inside `[min, max]` per axis.
/// In 2D the x axis holds a single layer.
fn lattice_counts(min: V3, max: V3, spacing: FT, dimension: Dimension) -> [usize; 3] {
    let count = |d: usize| ((max[d] - min[d]) / spacing).floor() as usize + 1;
    let num_x = match dimension {
        Dimension::Dim3D => count(0),
        Dimension::Dim2D => 1,
    };
    [num_x, count(1), count(2)]
}

/// Pushes the first `num_particles` lattice points, ordered by z, then y,
/// then x. In 2D the lattice lies in the plane `x = 0`.
fn add_block(
    min: V3,
    spacing: FT,
    [num_x, num_y, num_z]: [usize; 3],
    dimension: Dimension,
    num_particles: usize,
    positions: &mut Vec<V3>,
) {
    for z in 0..num_z {
        for y in 0..num_y {
            for x in 0..num_x {
                if positions.len() == num_particles {
                    return;
                }
                let px = match dimension {
                    Dimension::Dim3D => x as FT * spacing + min.x,
                    Dimension::Dim2D => 0.,
                };
                positions.push(vec3f(px, y as FT * spacing + min.y, z as FT * spacing + min.z));
            }
        }
    }
}

pub fn is_ft_approx_eq<FT: Float>(a: FT, b: FT, tolerance: FT) -> bool {
    assert!(!a.is_nan());
    assert!(!b.is_nan());
    b <= a + tolerance && b >= a - tolerance
}

pub fn assert_ft_approx_eq<FT: Float + Display>(a: FT, b: FT, tolerance: FT, s: impl FnOnce() -> String) {
    if !is_ft_approx_eq(a, b, tolerance) {
        panic!(
            "{} value not equal with a tolerance of {}:\n\ta={}\n\tb={}\n",
            s(),
            tolerance,
            a,
            b
        );
    }
}
