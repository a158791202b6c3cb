/*!
Position based fluids on the uniform grid.

One step runs these phases, each a full barrier over the active particles:

1. predict positions from velocity and gravity
2. reindex: cell ids from the predicted positions, key sort, cell ranges
3. `jacobi_iterations` times: density, constraint factor, correction, apply
4. derive velocities from the position change
5. commit positions through the wall policy

Particle mass is one; the rest density is expressed in the same units.
*/

use std::fmt;

use log::{debug, info, trace};
use rand::{rngs::StdRng, SeedableRng};

use crate::{
    boundary::{WallHandler, Walls},
    cell_ranges::CellRanges,
    concurrency::{par_iter_mut1, par_iter_mut2, par_iter_mut3, par_reduce},
    counters::{write_statistics, PerformanceCounters, ValueCounters},
    double_buffer::DoubleBuffer,
    floating_type_mod::FT,
    grid::{assign_cell_ids, GridDomain},
    key_sort::KeySort,
    neighborhood_search::{check_neighborhood, NeighborhoodGrid},
    particles::{reset_slots, FluidParticles},
    simulation::{generate_initial_positions, ParticleModel},
    simulation_parameters::{SimulationParams, ValidationError},
    sph_kernels::SmoothingKernels,
    V3,
};

/// Added to the time step when deriving velocities so a zero step still
/// yields finite values.
pub const TIME_STEP_EPSILON: FT = 1.0e-4;

pub struct FluidSimulation {
    params: SimulationParams,
    domain: GridDomain,
    kernels: SmoothingKernels,
    walls: Walls,

    particles: DoubleBuffer<FluidParticles>,
    cell_ranges: CellRanges,
    key_sort: KeySort,
    num_active: usize,

    rng: StdRng,
    pcounters: PerformanceCounters,
    vcounters: ValueCounters,

    step_number: usize,
    time: FT,
}

impl FluidSimulation {
    pub fn new(params: SimulationParams, counters_enabled: bool) -> Result<Self, ValidationError> {
        params.validate()?;

        let domain = GridDomain::from_params(&params)?;
        let rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut simulation = FluidSimulation {
            params,
            domain,
            kernels: SmoothingKernels::new(params.effect_radius),
            walls: Walls::new(params.boundary, params.wall_position),
            particles: DoubleBuffer::from_value(FluidParticles::new(params.max_particles)),
            cell_ranges: CellRanges::new(domain.num_cells()),
            key_sort: KeySort::new(params.max_particles, domain.num_cells() as usize + 1),
            num_active: 0,
            rng,
            pcounters: PerformanceCounters::new(counters_enabled),
            vcounters: ValueCounters::new(counters_enabled),
            step_number: 0,
            time: 0.,
        };
        simulation.reset(params.num_particles)?;
        Ok(simulation)
    }

    pub fn params(&self) -> &SimulationParams {
        &self.params
    }

    pub fn domain(&self) -> &GridDomain {
        &self.domain
    }

    pub fn kernels(&self) -> &SmoothingKernels {
        &self.kernels
    }

    /// Full particle storage (all slots, sorted order after a step).
    pub fn particles(&self) -> &FluidParticles {
        self.particles.front()
    }

    pub fn cell_ranges(&self) -> &CellRanges {
        &self.cell_ranges
    }

    pub fn step_number(&self) -> usize {
        self.step_number
    }

    pub fn time(&self) -> FT {
        self.time
    }

    /// Resets with the given positions and zero velocities. All other slots
    /// are moved to infinity.
    pub fn reset_with_positions(&mut self, positions: &[V3]) -> Result<(), ValidationError> {
        self.params.validate_particle_count(positions.len())?;

        let n = positions.len();
        let sentinel = self.domain.sentinel_cell_id();
        let p = self.particles.front_mut();
        reset_slots(&mut p.position, &mut p.velocity, positions);
        p.predicted.copy_from_slice(&p.position);
        par_iter_mut2(&mut p.correction, &mut p.cell_id, |_, corr, cell_id| {
            *corr = V3::zeros();
            *cell_id = sentinel;
        });
        par_iter_mut2(&mut p.density, &mut p.lambda, |_, density, lambda| {
            *density = 0.;
            *lambda = 0.;
        });
        assign_cell_ids(&self.domain, &p.position, &mut p.cell_id, n);

        self.num_active = n;
        self.step_number = 0;
        self.time = 0.;
        info!("reset fluid simulation with {} of {} particles", n, self.params.max_particles);
        Ok(())
    }

    /// Phase 1: `predicted = position + (velocity + gravity * dt) * dt`.
    pub fn predict(&mut self, dt: FT) {
        let n = self.num_active;
        let gravity = self.params.gravity_vector() * self.params.gravity_scale;
        let p = self.particles.front_mut();
        predict_positions(&p.position[..n], &p.velocity[..n], &mut p.predicted[..n], gravity, dt);
    }

    /// Phase 2: cell ids from the predicted positions, sort all particle
    /// buffers by cell and rebuild the cell ranges.
    pub fn reindex(&mut self) {
        let n = self.num_active;
        {
            let p = self.particles.front_mut();
            assign_cell_ids(&self.domain, &p.predicted, &mut p.cell_id, n);
        }

        self.key_sort.sort(&mut self.particles);

        let cap = if self.params.simplified_mode {
            Some(self.params.max_parts_in_cell)
        } else {
            None
        };
        self.cell_ranges.build(&self.particles.front().cell_id, cap);

        if self.params.check_neighborhood && !self.params.simplified_mode {
            let grid = NeighborhoodGrid::new(&self.domain, &self.cell_ranges, self.params.dimension);
            check_neighborhood(&grid, &self.particles.front().predicted[..n], self.params.effect_radius);
        }
    }

    /// Phase 3: one Jacobi iteration of the density constraint.
    pub fn jacobi_iteration(&mut self) {
        let n = self.num_active;
        let rest_density = self.params.rest_density;
        let grid = NeighborhoodGrid::new(&self.domain, &self.cell_ranges, self.params.dimension);
        let p = self.particles.front_mut();

        compute_densities(&grid, &self.kernels, &p.predicted, &mut p.density[..n]);
        compute_constraint_factors(
            &grid,
            &self.kernels,
            &p.predicted,
            &p.density[..n],
            &mut p.lambda[..n],
            rest_density,
            self.params.relaxation,
        );
        compute_corrections(
            &grid,
            &self.kernels,
            &p.predicted,
            &p.lambda,
            &mut p.correction[..n],
            rest_density,
        );
        apply_corrections(&mut p.predicted[..n], &p.correction[..n]);
    }

    /// Phase 4.
    pub fn update_velocities(&mut self, dt: FT) {
        let n = self.num_active;
        let max_velocity = self.params.max_velocity;
        let p = self.particles.front_mut();
        derive_velocities(&p.position[..n], &p.predicted[..n], &mut p.velocity[..n], dt, max_velocity);
    }

    /// Phase 5.
    pub fn commit_positions(&mut self) {
        let n = self.num_active;
        let walls = self.walls;
        let p = self.particles.front_mut();
        par_iter_mut3(
            &mut p.position[..n],
            &mut p.velocity[..n],
            &mut p.predicted[..n],
            |_, pos, vel, pred| {
                *pos = *pred;
                walls.confine(pos, vel);
                walls.confine_predicted(pred);
            },
        );
    }

    fn record_step_values(&mut self) {
        let n = self.num_active;
        let p = self.particles.front();
        let avg_density = if n > 0 {
            par_reduce(n, || 0., |a, b| a + b, |i| p.density[i]) / n as FT
        } else {
            0.
        };
        let max_speed = par_reduce(n, || 0., FT::max, |i| p.velocity[i].norm());
        self.vcounters.add_value("particle-count", n as FT);
        self.vcounters.add_value("avg-density", avg_density);
        self.vcounters.add_value("max-speed", max_speed);
        self.vcounters
            .add_value("occupied-cells", self.cell_ranges.num_occupied_cells() as FT);
    }
}

impl ParticleModel for FluidSimulation {
    fn step(&mut self, dt: FT) {
        debug!(
            "fluids: begin step {} time {:.3} dt {:.4} particles {}",
            self.step_number, self.time, dt, self.num_active
        );
        self.pcounters.begin("simulation-step");

        self.pcounters.begin("predict");
        self.predict(dt);
        self.pcounters.end("predict");

        self.pcounters.begin("reindex");
        self.reindex();
        self.pcounters.end("reindex");

        self.pcounters.begin("jacobi");
        for iter in 0..self.params.jacobi_iterations {
            self.jacobi_iteration();
            trace!("fluids: jacobi iteration {} done", iter);
        }
        self.pcounters.end("jacobi");

        self.pcounters.begin("velocity-and-boundary");
        self.update_velocities(dt);
        self.commit_positions();
        self.pcounters.end("velocity-and-boundary");

        self.pcounters.end("simulation-step");
        self.record_step_values();

        self.step_number += 1;
        self.time += dt;
    }

    fn reset(&mut self, num_particles: usize) -> Result<(), ValidationError> {
        self.params.validate_particle_count(num_particles)?;
        let positions = generate_initial_positions(&self.params, num_particles, &mut self.rng)?;
        self.reset_with_positions(&positions)
    }

    fn positions(&self) -> &[V3] {
        &self.particles.front().position[..self.num_active]
    }

    fn velocities(&self) -> &[V3] {
        &self.particles.front().velocity[..self.num_active]
    }

    fn scalar_field(&self) -> Option<&[FT]> {
        Some(&self.particles.front().density[..self.num_active])
    }

    fn num_particles(&self) -> usize {
        self.num_active
    }

    fn statistics(&self) -> Result<String, fmt::Error> {
        write_statistics(&self.pcounters, &self.vcounters)
    }
}

pub fn predict_positions(position: &[V3], velocity: &[V3], predicted: &mut [V3], gravity: V3, dt: FT) {
    par_iter_mut1(predicted, |i, pred| {
        *pred = position[i] + (velocity[i] + gravity * dt) * dt;
    });
}

/// `density[i] = sum_j poly6(|x_i - x_j|^2)` over the grid neighbors,
/// including `i` itself.
pub fn compute_densities(grid: &NeighborhoodGrid, kernels: &SmoothingKernels, predicted: &[V3], density: &mut [FT]) {
    par_iter_mut1(density, |i, p_density| {
        let xi = predicted[i];
        let mut sum = 0.;
        grid.for_each_neighbor(&xi, |j| {
            sum += kernels.poly6((xi - predicted[j]).norm_squared());
        });
        *p_density = sum;
    });
}

/**
 * Constraint factor of every particle:
 *
 * `lambda_i = -C_i / (sum_j |grad_j C_i|^2 + |grad_i C_i|^2 + relaxation)`
 *
 * with `C_i = density_i / rest_density - 1`, `grad_j C_i = -grad W_ij / rest_density`
 * and `grad_i C_i = sum_j grad W_ij / rest_density`.
 */
pub fn compute_constraint_factors(
    grid: &NeighborhoodGrid,
    kernels: &SmoothingKernels,
    predicted: &[V3],
    density: &[FT],
    lambda: &mut [FT],
    rest_density: FT,
    relaxation: FT,
) {
    let inv_rest_density_sq = 1. / (rest_density * rest_density);
    par_iter_mut1(lambda, |i, p_lambda| {
        let xi = predicted[i];
        let constraint = density[i] / rest_density - 1.;

        let mut grad_sq_sum = 0.;
        let mut grad_i = V3::zeros();
        grid.for_each_neighbor(&xi, |j| {
            let grad = kernels.grad_spiky(xi - predicted[j]);
            grad_sq_sum += grad.norm_squared();
            grad_i += grad;
        });

        let denominator = (grad_sq_sum + grad_i.norm_squared()) * inv_rest_density_sq + relaxation;
        *p_lambda = -constraint / denominator;
    });
}

/// `correction_i = sum_j (lambda_i + lambda_j) grad W_ij / rest_density`
pub fn compute_corrections(
    grid: &NeighborhoodGrid,
    kernels: &SmoothingKernels,
    predicted: &[V3],
    lambda: &[FT],
    correction: &mut [V3],
    rest_density: FT,
) {
    par_iter_mut1(correction, |i, p_correction| {
        let xi = predicted[i];
        let mut sum = V3::zeros();
        grid.for_each_neighbor(&xi, |j| {
            sum += kernels.grad_spiky(xi - predicted[j]) * (lambda[i] + lambda[j]);
        });
        *p_correction = sum / rest_density;
    });
}

pub fn apply_corrections(predicted: &mut [V3], correction: &[V3]) {
    par_iter_mut1(predicted, |i, pred| {
        *pred += correction[i];
    });
}

/// `velocity = (predicted - position) / (dt + eps)`, limited to `max_velocity`.
pub fn derive_velocities(position: &[V3], predicted: &[V3], velocity: &mut [V3], dt: FT, max_velocity: FT) {
    let inv_dt = 1. / (FT::max(dt, 0.) + TIME_STEP_EPSILON);
    par_iter_mut1(velocity, |i, vel| {
        let v = (predicted[i] - position[i]) * inv_dt;
        let speed = v.norm();
        *vel = if speed > max_velocity { v * (max_velocity / speed) } else { v };
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vec3f;

    fn test_params() -> SimulationParams {
        SimulationParams {
            wall_position: 10.,
            grid_resolution: 10,
            effect_radius: 2.,
            max_particles: 64,
            num_particles: 0,
            seed: Some(7),
            ..Default::default()
        }
    }

    #[test]
    fn isolated_particle_density_is_the_self_term() {
        let mut sim = FluidSimulation::new(test_params(), false).unwrap();
        sim.reset_with_positions(&[vec3f(-5., -5., -5.), vec3f(5., 5., 5.)]).unwrap();
        sim.predict(0.);
        sim.reindex();
        sim.jacobi_iteration();

        let self_term = sim.kernels().poly6(0.);
        for &density in sim.scalar_field().unwrap() {
            assert_eq!(density, self_term);
        }
    }

    #[test]
    fn zero_time_step_gives_finite_velocities() {
        let mut sim = FluidSimulation::new(test_params(), false).unwrap();
        sim.reset_with_positions(&[vec3f(0., 0., 0.), vec3f(0.3, 0., 0.), vec3f(0., 0.2, 0.1)])
            .unwrap();
        sim.step(0.);

        for v in sim.velocities() {
            assert!(v.iter().all(|x| x.is_finite()));
            assert!(v.norm() <= sim.params().max_velocity * 1.0001);
        }
        for x in sim.positions() {
            assert!(x.iter().all(|c| c.is_finite()));
        }
    }

    #[test]
    fn lone_particle_falls_with_gravity() {
        let mut sim = FluidSimulation::new(test_params(), false).unwrap();
        sim.reset_with_positions(&[vec3f(1., 2., 3.)]).unwrap();
        sim.step(1.);

        let params = sim.params();
        let expected_drop = -params.gravity * params.gravity_scale;
        crate::assert_ft_approx_eq(sim.positions()[0].y, 2. - expected_drop, 1.0e-5, || "fallen height".to_string());
        assert!(sim.velocities()[0].y < 0.);
        assert_eq!(sim.velocities()[0].x, 0.);
        assert_eq!(sim.step_number(), 1);
    }

    #[test]
    fn inactive_slots_stay_behind_active_ones() {
        let mut sim = FluidSimulation::new(test_params(), false).unwrap();
        sim.reset_with_positions(&[vec3f(4., 4., 4.), vec3f(-4., -4., -4.), vec3f(0., 0., 0.)])
            .unwrap();
        sim.step(1.);

        let sentinel = sim.domain().sentinel_cell_id();
        let cell_ids = &sim.particles().cell_id;
        assert!(cell_ids[..3].iter().all(|&c| c < sentinel));
        assert!(cell_ids[3..].iter().all(|&c| c == sentinel));
        assert!(cell_ids.windows(2).all(|w| w[0] <= w[1]));
        assert!(sim.particles().position[3].x.is_infinite());
    }

    #[test]
    fn too_many_particles_are_rejected_on_reset() {
        let mut sim = FluidSimulation::new(test_params(), false).unwrap();
        assert_eq!(
            sim.reset(65),
            Err(ValidationError::TooManyParticles {
                requested: 65,
                capacity: 64
            })
        );
        assert!(sim.reset(64).is_ok());
        assert_eq!(sim.num_particles(), 64);
    }

    #[test]
    fn particles_stay_inside_bouncing_walls() {
        let params = SimulationParams {
            num_particles: 64,
            gravity_scale: 1.,
            ..test_params()
        };
        let mut sim = FluidSimulation::new(params, false).unwrap();
        for _ in 0..20 {
            sim.step(1.);
        }
        let h = sim.params().wall_position;
        for x in sim.positions() {
            assert!(x.iter().all(|c| c.abs() <= h), "{:?} left the domain", x);
        }
    }
}
