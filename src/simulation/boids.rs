/*!
Flocking on the uniform grid.

Every step reindexes the boids by their current positions, accumulates the
cohesion, alignment and separation rules (plus the optional target rule)
over the grid neighbors, and integrates velocity and position. New
velocities are written to `velocity_next` and swapped in after the
integration phase, so the rule phase always reads the velocities of the
previous step.

`reset` gives every boid a random heading at the minimum speed. A zero
velocity, as left by `reset_with_positions`, stays zero until a rule
accelerates the boid.
*/

use std::{fmt, mem};

use log::{debug, info};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    boundary::{WallHandler, Walls},
    cell_ranges::CellRanges,
    concurrency::{par_iter_mut1, par_iter_mut2, par_reduce},
    counters::{write_statistics, PerformanceCounters, ValueCounters},
    double_buffer::DoubleBuffer,
    floating_type_mod::FT,
    grid::{assign_cell_ids, GridDomain},
    key_sort::KeySort,
    neighborhood_search::{check_neighborhood, NeighborhoodGrid},
    particles::{reset_slots, BoidParticles},
    simulation::{generate_initial_positions, ParticleModel},
    simulation_parameters::{Dimension, SimulationParams, TargetParams, ValidationError},
    sph_kernels::DISPLACEMENT_EPSILON_SQ,
    V3,
};

/// Boids never get slower than this fraction of the speed limit.
pub const MIN_SPEED_FACTOR: FT = 0.2;

#[inline(always)]
fn normalize_or_zero(v: V3) -> V3 {
    let norm_sq = v.norm_squared();
    if norm_sq < DISPLACEMENT_EPSILON_SQ {
        V3::zeros()
    } else {
        v / norm_sq.sqrt()
    }
}

/// Rule weights of one step. Inactive rules have weight zero.
#[derive(Debug, Clone, Copy)]
pub struct FlockingRules {
    pub effect_radius_sq: FT,
    pub cohesion: FT,
    pub alignment: FT,
    pub separation: FT,
    pub target: TargetParams,
    pub planar: bool,
}

impl FlockingRules {
    pub fn from_params(params: &SimulationParams, target: TargetParams) -> Self {
        let scales = params.boids_rule_scales();
        FlockingRules {
            effect_radius_sq: params.effect_radius_squared(),
            cohesion: scales.x,
            alignment: scales.y,
            separation: scales.z,
            target,
            planar: params.dimension == Dimension::Dim2D,
        }
    }

    /// Acceleration of a boid at `xi` given the positions and velocities of
    /// its grid neighbors.
    #[inline(always)]
    pub fn acceleration(&self, grid: &NeighborhoodGrid, xi: V3, position: &[V3], velocity: &[V3]) -> V3 {
        let mut count = 0;
        let mut position_sum = V3::zeros();
        let mut heading_sum = V3::zeros();
        let mut repulsion_sum = V3::zeros();

        grid.for_each_neighbor(&xi, |j| {
            let diff = xi - position[j];
            let dist_sq = diff.norm_squared();
            if dist_sq > DISPLACEMENT_EPSILON_SQ && dist_sq < self.effect_radius_sq {
                count += 1;
                position_sum += position[j];
                heading_sum += normalize_or_zero(velocity[j]);
                repulsion_sum += diff / dist_sq;
            }
        });

        let mut acceleration = V3::zeros();
        if count > 0 {
            let inv_count = 1. / count as FT;
            let cohesion = normalize_or_zero(position_sum * inv_count - xi);
            let alignment = normalize_or_zero(heading_sum * inv_count);
            let separation = normalize_or_zero(repulsion_sum);
            acceleration += cohesion * self.cohesion + alignment * self.alignment + separation * self.separation;
        }

        if self.target.active {
            let to_target = self.target.position - xi;
            if to_target.norm_squared() < self.target.radius * self.target.radius {
                let steering = to_target * self.target.sign.factor();
                let steering_len = steering.norm();
                acceleration += if steering_len > self.target.max_steering {
                    steering * (self.target.max_steering / steering_len)
                } else {
                    steering
                };
            }
        }

        if self.planar {
            acceleration.x = 0.;
        }
        acceleration
    }
}

/// `|v|` is clamped to `[min_speed, max_speed]`; a zero velocity stays zero.
#[inline(always)]
pub fn limit_speed(v: V3, min_speed: FT, max_speed: FT) -> V3 {
    let speed = v.norm();
    if speed * speed < DISPLACEMENT_EPSILON_SQ {
        v
    } else if speed > max_speed {
        v * (max_speed / speed)
    } else if speed < min_speed {
        v * (min_speed / speed)
    } else {
        v
    }
}

/// Random directions with the minimum speed, so a boid without neighbors
/// still moves after a reset. In 2D the headings lie in the plane `x = 0`.
pub fn random_headings(params: &SimulationParams, num_particles: usize, rng: &mut impl Rng) -> Vec<V3> {
    let min_speed = MIN_SPEED_FACTOR * params.max_velocity;
    (0..num_particles)
        .map(|_| loop {
            let x = match params.dimension {
                Dimension::Dim3D => rng.gen_range(-1. ..1.),
                Dimension::Dim2D => 0.,
            };
            let direction = normalize_or_zero(V3::new(x, rng.gen_range(-1. ..1.), rng.gen_range(-1. ..1.)));
            if direction != V3::zeros() {
                break direction * min_speed;
            }
        })
        .collect()
}

pub struct BoidsSimulation {
    params: SimulationParams,
    domain: GridDomain,
    walls: Walls,
    target: TargetParams,

    particles: DoubleBuffer<BoidParticles>,
    cell_ranges: CellRanges,
    key_sort: KeySort,
    num_active: usize,

    rng: StdRng,
    pcounters: PerformanceCounters,
    vcounters: ValueCounters,

    step_number: usize,
    time: FT,
}

impl BoidsSimulation {
    pub fn new(params: SimulationParams, counters_enabled: bool) -> Result<Self, ValidationError> {
        params.validate()?;

        let domain = GridDomain::from_params(&params)?;
        let rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut simulation = BoidsSimulation {
            params,
            domain,
            walls: Walls::new(params.boundary, params.wall_position),
            target: params.target,
            particles: DoubleBuffer::from_value(BoidParticles::new(params.max_particles)),
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

    pub fn target(&self) -> &TargetParams {
        &self.target
    }

    pub fn particles(&self) -> &BoidParticles {
        self.particles.front()
    }

    pub fn step_number(&self) -> usize {
        self.step_number
    }

    pub fn time(&self) -> FT {
        self.time
    }

    pub fn reset_with_positions(&mut self, positions: &[V3]) -> Result<(), ValidationError> {
        self.reset_with_state(positions, &[])
    }

    /// Resets with the given positions and velocities. Missing velocities
    /// are zero.
    pub fn reset_with_state(&mut self, positions: &[V3], velocities: &[V3]) -> Result<(), ValidationError> {
        self.params.validate_particle_count(positions.len())?;
        assert!(velocities.len() <= positions.len());

        let n = positions.len();
        let p = self.particles.front_mut();
        reset_slots(&mut p.position, &mut p.velocity, positions);
        p.velocity[..velocities.len()].copy_from_slice(velocities);
        par_iter_mut2(&mut p.velocity_next, &mut p.acceleration, |_, v_next, acc| {
            *v_next = V3::zeros();
            *acc = V3::zeros();
        });
        assign_cell_ids(&self.domain, &p.position, &mut p.cell_id, n);

        self.num_active = n;
        self.step_number = 0;
        self.time = 0.;
        info!("reset boids simulation with {} of {} boids", n, self.params.max_particles);
        Ok(())
    }

    pub fn reindex(&mut self) {
        let n = self.num_active;
        {
            let p = self.particles.front_mut();
            assign_cell_ids(&self.domain, &p.position, &mut p.cell_id, n);
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
            check_neighborhood(&grid, &self.particles.front().position[..n], self.params.effect_radius);
        }
    }

    pub fn compute_accelerations(&mut self) {
        let n = self.num_active;
        let rules = FlockingRules::from_params(&self.params, self.target);
        let grid = NeighborhoodGrid::new(&self.domain, &self.cell_ranges, self.params.dimension);
        let p = self.particles.front_mut();
        let (position, velocity) = (&p.position, &p.velocity);
        par_iter_mut1(&mut p.acceleration[..n], |i, acc| {
            *acc = rules.acceleration(&grid, position[i], position, velocity);
        });
    }

    pub fn integrate(&mut self, dt: FT) {
        let n = self.num_active;
        let walls = self.walls;
        let max_speed = self.params.max_velocity;
        let min_speed = MIN_SPEED_FACTOR * max_speed;
        let p = self.particles.front_mut();
        let (velocity, acceleration) = (&p.velocity, &p.acceleration);
        par_iter_mut2(
            &mut p.position[..n],
            &mut p.velocity_next[..n],
            |i, pos, v_next| {
                let mut v = limit_speed(velocity[i] + acceleration[i] * dt, min_speed, max_speed);
                *pos += v * dt;
                walls.confine(pos, &mut v);
                *v_next = v;
            },
        );
        mem::swap(&mut p.velocity, &mut p.velocity_next);
    }

    fn record_step_values(&mut self) {
        let n = self.num_active;
        let p = self.particles.front();
        let max_speed = par_reduce(n, || 0., FT::max, |i| p.velocity[i].norm());
        self.vcounters.add_value("particle-count", n as FT);
        self.vcounters.add_value("max-speed", max_speed);
        self.vcounters
            .add_value("occupied-cells", self.cell_ranges.num_occupied_cells() as FT);
    }
}

impl ParticleModel for BoidsSimulation {
    fn step(&mut self, dt: FT) {
        debug!(
            "boids: begin step {} time {:.3} dt {:.4} boids {}",
            self.step_number, self.time, dt, self.num_active
        );
        self.pcounters.begin("simulation-step");

        self.pcounters.begin("reindex");
        self.reindex();
        self.pcounters.end("reindex");

        self.pcounters.begin("rules");
        self.compute_accelerations();
        self.pcounters.end("rules");

        self.pcounters.begin("integrate");
        self.integrate(dt);
        self.pcounters.end("integrate");

        self.pcounters.end("simulation-step");
        self.record_step_values();

        self.step_number += 1;
        self.time += dt;
    }

    fn reset(&mut self, num_particles: usize) -> Result<(), ValidationError> {
        self.params.validate_particle_count(num_particles)?;
        let positions = generate_initial_positions(&self.params, num_particles, &mut self.rng)?;
        let headings = random_headings(&self.params, num_particles, &mut self.rng);
        self.reset_with_state(&positions, &headings)
    }

    fn positions(&self) -> &[V3] {
        &self.particles.front().position[..self.num_active]
    }

    fn velocities(&self) -> &[V3] {
        &self.particles.front().velocity[..self.num_active]
    }

    fn scalar_field(&self) -> Option<&[FT]> {
        None
    }

    fn num_particles(&self) -> usize {
        self.num_active
    }

    fn set_target(&mut self, target: TargetParams) {
        debug!("boids: target {:?}", target);
        self.target = target;
    }

    fn statistics(&self) -> Result<String, fmt::Error> {
        write_statistics(&self.pcounters, &self.vcounters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{simulation_parameters::TargetSign, vec3f};

    fn test_params() -> SimulationParams {
        SimulationParams {
            model: crate::simulation_parameters::ModelType::Boids,
            wall_position: 10.,
            grid_resolution: 10,
            effect_radius: 2.,
            max_particles: 256,
            num_particles: 0,
            max_velocity: 2.,
            seed: Some(3),
            ..Default::default()
        }
    }

    #[test]
    fn speed_is_clamped_to_the_window() {
        let max = 2.;
        let fast = limit_speed(vec3f(0., 10., 0.), 0.2 * max, max);
        crate::assert_ft_approx_eq(fast.norm(), max, 1.0e-5, || "fast".to_string());
        let slow = limit_speed(vec3f(0., 0., 0.01), 0.2 * max, max);
        crate::assert_ft_approx_eq(slow.norm(), 0.4, 1.0e-5, || "slow".to_string());
        assert!(slow.z > 0.);
        assert_eq!(limit_speed(V3::zeros(), 0.4, max), V3::zeros());
    }

    #[test]
    fn separation_pushes_close_boids_apart() {
        let params = SimulationParams {
            active_cohesion: false,
            active_alignment: false,
            ..test_params()
        };
        let mut sim = BoidsSimulation::new(params, false).unwrap();
        sim.reset_with_positions(&[vec3f(0., 0., 0.), vec3f(0.5, 0., 0.)]).unwrap();
        sim.step(0.1);

        let p = sim.positions();
        let (left, right) = if p[0].x < p[1].x { (p[0], p[1]) } else { (p[1], p[0]) };
        assert!(left.x < 0.);
        assert!(right.x > 0.5);
        assert!(right.x - left.x > 0.5);
    }

    #[test]
    fn cohesion_pulls_boids_together() {
        let params = SimulationParams {
            active_alignment: false,
            active_separation: false,
            ..test_params()
        };
        let mut sim = BoidsSimulation::new(params, false).unwrap();
        sim.reset_with_positions(&[vec3f(0., 0., 0.), vec3f(0., 1.5, 0.)]).unwrap();
        sim.step(0.1);

        let p = sim.positions();
        assert!((p[0] - p[1]).norm() < 1.5);
    }

    #[test]
    fn boids_out_of_range_do_not_interact() {
        let mut sim = BoidsSimulation::new(test_params(), false).unwrap();
        sim.reset_with_positions(&[vec3f(0., 0., 0.), vec3f(0., 0., 1.99)]).unwrap();
        sim.reindex();
        sim.compute_accelerations();
        assert!(sim.particles().acceleration[..2].iter().all(|a| a.norm() > 0.));

        sim.reset_with_positions(&[vec3f(0., 0., 0.), vec3f(0., 0., 2.01)]).unwrap();
        sim.reindex();
        sim.compute_accelerations();
        assert!(sim.particles().acceleration[..2].iter().all(|a| *a == V3::zeros()));
    }

    #[test]
    fn target_attracts_and_repels() {
        for (sign, expect_up) in [(TargetSign::Attract, true), (TargetSign::Repel, false)] {
            let mut sim = BoidsSimulation::new(test_params(), false).unwrap();
            sim.reset_with_positions(&[vec3f(0., 0., 0.)]).unwrap();
            sim.set_target(TargetParams {
                active: true,
                position: vec3f(0., 3., 0.),
                radius: 5.,
                sign,
                max_steering: 0.5,
            });
            assert_eq!(sim.target().sign, sign);
            sim.step(1.);

            let y = sim.positions()[0].y;
            if expect_up {
                crate::assert_ft_approx_eq(y, 0.5, 1.0e-5, || "attracted".to_string());
            } else {
                crate::assert_ft_approx_eq(y, -0.5, 1.0e-5, || "repelled".to_string());
            }
        }
    }

    #[test]
    fn target_outside_radius_is_ignored() {
        let mut sim = BoidsSimulation::new(test_params(), false).unwrap();
        sim.reset_with_positions(&[vec3f(0., 0., 0.)]).unwrap();
        sim.set_target(TargetParams {
            active: true,
            position: vec3f(0., 8., 0.),
            radius: 5.,
            ..Default::default()
        });
        sim.step(1.);
        assert_eq!(sim.positions()[0], V3::zeros());
    }

    #[test]
    fn planar_flock_stays_in_the_plane() {
        let params = SimulationParams {
            dimension: Dimension::Dim2D,
            num_particles: 200,
            ..test_params()
        };
        let mut sim = BoidsSimulation::new(params, false).unwrap();
        for _ in 0..10 {
            sim.step(1.);
        }
        assert_eq!(sim.num_particles(), 200);
        for (x, v) in sim.positions().iter().zip(sim.velocities()) {
            assert_eq!(x.x, 0.);
            assert_eq!(v.x, 0.);
        }
    }

    #[test]
    fn lone_boid_keeps_moving_after_reset() {
        let params = SimulationParams {
            num_particles: 1,
            boundary: crate::simulation_parameters::BoundaryType::CyclicWall,
            ..test_params()
        };
        let mut sim = BoidsSimulation::new(params, false).unwrap();
        crate::assert_ft_approx_eq(sim.velocities()[0].norm(), 0.4, 1.0e-5, || "initial heading".to_string());
        let start = sim.positions()[0];
        for _ in 0..5 {
            sim.step(1.);
            assert!(sim.velocities()[0].norm() >= 0.4 * 0.9999);
        }
        assert_ne!(sim.positions()[0], start);
        assert_eq!(sim.step_number(), 5);
        crate::assert_ft_approx_eq(sim.time(), 5., 1.0e-5, || "boids time".to_string());
    }

    #[test]
    fn planar_headings_lie_in_the_plane() {
        let params = SimulationParams {
            dimension: Dimension::Dim2D,
            ..test_params()
        };
        let mut rng = StdRng::seed_from_u64(9);
        let headings = random_headings(&params, 100, &mut rng);
        assert!(headings.iter().all(|v| v.x == 0.));
        assert!(headings
            .iter()
            .all(|v| crate::is_ft_approx_eq(v.norm(), 0.2 * params.max_velocity, 1.0e-5)));
    }

    #[test]
    fn velocities_stay_in_the_speed_window() {
        let params = SimulationParams {
            num_particles: 200,
            boundary: crate::simulation_parameters::BoundaryType::CyclicWall,
            ..test_params()
        };
        let mut sim = BoidsSimulation::new(params, false).unwrap();
        let positions = sim.positions().to_vec();
        sim.reset_with_state(&positions, &vec![vec3f(0., 1., 0.); positions.len()])
            .unwrap();
        for _ in 0..5 {
            sim.step(1.);
            for v in sim.velocities() {
                let speed = v.norm();
                assert!(speed <= 2. * 1.0001, "speed {}", speed);
                assert!(speed >= 0.4 * 0.9999, "speed {}", speed);
            }
        }
    }
}
