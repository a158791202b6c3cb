use std::fmt::{self, Display};

use crate::{floating_type_mod::FT, vec3f, V3};
use serde::{Deserialize, Serialize};

#[derive(PartialEq, Eq, Debug, Clone, Copy, Serialize, Deserialize)]
pub enum ModelType {
    /// Position based fluids
    Fluids,
    Boids,
}

#[derive(PartialEq, Eq, Debug, Clone, Copy, Serialize, Deserialize)]
pub enum Dimension {
    /// Particles live in the central x-layer of the grid (the y-z plane at x=0).
    Dim2D,
    Dim3D,
}

#[derive(PartialEq, Eq, Debug, Clone, Copy, Serialize, Deserialize)]
pub enum BoundaryType {
    BouncingWall,
    CyclicWall,
}

#[derive(PartialEq, Eq, Debug, Clone, Copy, Serialize, Deserialize)]
pub enum TargetSign {
    Attract,
    Repel,
}

impl TargetSign {
    pub fn factor(self) -> FT {
        match self {
            TargetSign::Attract => 1.,
            TargetSign::Repel => -1.,
        }
    }
}

#[derive(PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TargetParams {
    pub active: bool,
    pub position: V3,
    pub radius: FT,
    pub sign: TargetSign,
    pub max_steering: FT,
}

impl Default for TargetParams {
    fn default() -> Self {
        TargetParams {
            active: false,
            position: V3::zeros(),
            radius: 5.,
            sign: TargetSign::Attract,
            max_steering: 0.5,
        }
    }
}

#[derive(PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
pub enum InitialLayout {
    /// Uniformly distributed inside the domain.
    Random,

    /// Regular lattice filling the box `[min, max)` row by row.
    Block { min: V3, max: V3, spacing: FT },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationParams {
    pub model: ModelType,
    pub dimension: Dimension,
    pub boundary: BoundaryType,

    // the domain is the cube [-wall_position, wall_position]^3
    pub wall_position: FT,
    pub grid_resolution: u32,

    pub max_particles: usize,
    pub num_particles: usize,

    // kernel support radius (fluids) and neighbor radius (boids)
    pub effect_radius: FT,

    // ---------------
    // fluids
    pub rest_density: FT,
    // constraint force mixing in the denominator of the constraint factor
    pub relaxation: FT,
    pub jacobi_iterations: usize,
    pub gravity: FT,
    pub gravity_scale: FT,

    // boids speed limit and fluid velocity clamp
    pub max_velocity: FT,

    // ---------------
    // boids
    pub scale_cohesion: FT,
    pub scale_alignment: FT,
    pub scale_separation: FT,
    pub active_cohesion: bool,
    pub active_alignment: bool,
    pub active_separation: bool,
    pub target: TargetParams,

    // cap the number of particles that are visible per grid cell
    pub simplified_mode: bool,
    pub max_parts_in_cell: u32,

    pub initial_layout: InitialLayout,
    pub seed: Option<u64>,

    // compares grid neighbors against an r-tree query in every step (slow)
    pub check_neighborhood: bool,

    // ---------------
    // wall clock to time step conversion (used by the driver)
    pub frame_duration_ms: FT,
    pub max_time_step: FT,
    // step used after a suspension; 1.0 advances one frame, 0.0 skips it
    pub fallback_time_step: FT,
}

impl Default for SimulationParams {
    fn default() -> Self {
        SimulationParams {
            model: ModelType::Fluids,
            dimension: Dimension::Dim3D,
            boundary: BoundaryType::BouncingWall,
            wall_position: 10.,
            grid_resolution: 10,
            max_particles: 16384,
            num_particles: 4096,
            effect_radius: 2.,
            rest_density: 1.,
            relaxation: 0.01,
            jacobi_iterations: 3,
            gravity: -9.81,
            gravity_scale: 0.001,
            max_velocity: 2.,
            scale_cohesion: 1.45,
            scale_alignment: 1.6,
            scale_separation: 1.6,
            active_cohesion: true,
            active_alignment: true,
            active_separation: true,
            target: TargetParams::default(),
            simplified_mode: true,
            max_parts_in_cell: 1000,
            initial_layout: InitialLayout::Random,
            seed: None,
            check_neighborhood: false,
            frame_duration_ms: 16.,
            max_time_step: 30.,
            fallback_time_step: 1.,
        }
    }
}

impl SimulationParams {
    pub fn cell_size(&self) -> FT {
        2. * self.wall_position / self.grid_resolution as FT
    }

    pub fn effect_radius_squared(&self) -> FT {
        self.effect_radius * self.effect_radius
    }

    pub fn gravity_vector(&self) -> V3 {
        vec3f(0., self.gravity, 0.)
    }

    /// Scale factors of the boids rules with inactive rules set to zero.
    pub fn boids_rule_scales(&self) -> V3 {
        vec3f(
            if self.active_cohesion { self.scale_cohesion } else { 0. },
            if self.active_alignment { self.scale_alignment } else { 0. },
            if self.active_separation { self.scale_separation } else { 0. },
        )
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(self.wall_position > 0.) || !self.wall_position.is_finite() {
            return Err(ValidationError::NonPositiveWallPosition(self.wall_position));
        }
        if self.grid_resolution == 0 {
            return Err(ValidationError::ZeroGridResolution);
        }
        // one id past the last cell is reserved for the sentinel
        let num_cells = (self.grid_resolution as u64).pow(3);
        if num_cells >= u32::MAX as u64 {
            return Err(ValidationError::GridTooLarge(self.grid_resolution));
        }
        if self.max_particles >= u32::MAX as usize {
            return Err(ValidationError::CapacityTooLarge(self.max_particles));
        }
        self.validate_particle_count(self.num_particles)?;

        let cell_size = self.cell_size();
        if !(self.effect_radius > 0.) || self.effect_radius > cell_size {
            return Err(ValidationError::InvalidEffectRadius {
                effect_radius: self.effect_radius,
                cell_size,
            });
        }

        if !(self.rest_density > 0.) {
            return Err(ValidationError::NonPositiveRestDensity(self.rest_density));
        }
        if !(self.relaxation >= 0.) {
            return Err(ValidationError::NegativeRelaxation(self.relaxation));
        }
        if self.jacobi_iterations == 0 {
            return Err(ValidationError::ZeroJacobiIterations);
        }
        if !(self.max_velocity > 0.) {
            return Err(ValidationError::InvalidMaxVelocity(self.max_velocity));
        }
        if self.simplified_mode && self.max_parts_in_cell == 0 {
            return Err(ValidationError::ZeroCellCapacity);
        }
        if !(self.frame_duration_ms > 0.)
            || !(self.max_time_step > 0.)
            || !(self.fallback_time_step >= 0.)
            || self.fallback_time_step > self.max_time_step
        {
            return Err(ValidationError::InvalidTimeStepSettings);
        }

        if let InitialLayout::Block { min, max, spacing } = self.initial_layout {
            if !(spacing > 0.) {
                return Err(ValidationError::InvalidBlockSpacing(spacing));
            }
            for d in 0..3 {
                if !(min[d] > -self.wall_position && max[d] < self.wall_position && min[d] <= max[d]) {
                    return Err(ValidationError::BlockOutsideDomain);
                }
            }
        }

        Ok(())
    }

    pub fn validate_particle_count(&self, num_particles: usize) -> Result<(), ValidationError> {
        if num_particles > self.max_particles {
            return Err(ValidationError::TooManyParticles {
                requested: num_particles,
                capacity: self.max_particles,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    NonPositiveWallPosition(FT),
    ZeroGridResolution,
    GridTooLarge(u32),
    CapacityTooLarge(usize),
    TooManyParticles { requested: usize, capacity: usize },
    InvalidEffectRadius { effect_radius: FT, cell_size: FT },
    NonPositiveRestDensity(FT),
    NegativeRelaxation(FT),
    ZeroJacobiIterations,
    InvalidMaxVelocity(FT),
    ZeroCellCapacity,
    InvalidTimeStepSettings,
    InvalidBlockSpacing(FT),
    BlockOutsideDomain,
    BlockTooSmall { lattice_points: usize, requested: usize },
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::NonPositiveWallPosition(x) => write!(f, "wall position must be positive (got {})", x),
            ValidationError::ZeroGridResolution => write!(f, "grid resolution must be at least 1"),
            ValidationError::GridTooLarge(res) => write!(f, "grid resolution {} yields too many cells", res),
            ValidationError::CapacityTooLarge(n) => write!(f, "particle capacity {} is too large", n),
            ValidationError::TooManyParticles { requested, capacity } => write!(
                f,
                "requested {} particles but capacity is {}",
                requested, capacity
            ),
            ValidationError::InvalidEffectRadius {
                effect_radius,
                cell_size,
            } => write!(
                f,
                "effect radius {} must be positive and not larger than the cell size {}",
                effect_radius, cell_size
            ),
            ValidationError::NonPositiveRestDensity(x) => write!(f, "rest density must be positive (got {})", x),
            ValidationError::NegativeRelaxation(x) => write!(f, "relaxation must not be negative (got {})", x),
            ValidationError::ZeroJacobiIterations => write!(f, "at least one jacobi iteration is required"),
            ValidationError::InvalidMaxVelocity(x) => write!(f, "max velocity must be positive (got {})", x),
            ValidationError::ZeroCellCapacity => write!(f, "simplified mode needs max_parts_in_cell >= 1"),
            ValidationError::InvalidTimeStepSettings => write!(
                f,
                "time step settings need frame_duration_ms > 0, max_time_step > 0 and 0 <= fallback_time_step <= max_time_step"
            ),
            ValidationError::InvalidBlockSpacing(x) => write!(f, "block spacing must be positive (got {})", x),
            ValidationError::BlockOutsideDomain => write!(f, "initial block must lie strictly inside the domain"),
            ValidationError::BlockTooSmall {
                lattice_points,
                requested,
            } => write!(
                f,
                "initial block holds {} lattice points but {} particles were requested",
                lattice_points, requested
            ),
        }
    }
}

impl std::error::Error for ValidationError {}

#[test]
fn default_params_are_valid() {
    let params = SimulationParams::default();
    assert_eq!(params.validate(), Ok(()));
    crate::assert_ft_approx_eq(params.cell_size() * params.grid_resolution as FT, 2. * params.wall_position, 1.0e-5, || {
        "cell size times resolution".to_string()
    });
}

#[test]
fn capacity_overflow_is_rejected() {
    let params = SimulationParams {
        max_particles: 10,
        num_particles: 11,
        ..Default::default()
    };
    assert_eq!(
        params.validate(),
        Err(ValidationError::TooManyParticles {
            requested: 11,
            capacity: 10
        })
    );
}

#[test]
fn effect_radius_larger_than_cell_is_rejected() {
    let params = SimulationParams {
        wall_position: 10.,
        grid_resolution: 20,
        effect_radius: 1.5,
        ..Default::default()
    };
    assert!(matches!(
        params.validate(),
        Err(ValidationError::InvalidEffectRadius { .. })
    ));
}

#[test]
fn inactive_boids_rules_have_zero_scale() {
    let params = SimulationParams {
        active_alignment: false,
        ..Default::default()
    };
    let scales = params.boids_rule_scales();
    assert_eq!(scales.y, 0.);
    assert_eq!(scales.x, params.scale_cohesion);
    assert_eq!(scales.z, params.scale_separation);
}

#[test]
fn params_roundtrip_through_yaml_with_missing_keys() {
    let yaml = "model: Boids\ngrid_resolution: 8\nwall_position: 4.0\neffect_radius: 1.0\n";
    let params: SimulationParams = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(params.model, ModelType::Boids);
    assert_eq!(params.grid_resolution, 8);
    assert_eq!(params.jacobi_iterations, 3);
    assert_eq!(params.validate(), Ok(()));
}
