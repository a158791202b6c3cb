/*!
Uniform grid over the cubic simulation domain `[-half_extent, half_extent]^3`.

Cells are addressed either by their axis indices `(ix, iy, iz)` or by a
flattened row-major id `ix * res_y * res_z + iy * res_z + iz`. The id right
after the last cell is the sentinel for unused particle slots, so those
slots sort behind every occupied cell.
*/

use crate::{
    concurrency::par_iter_mut1,
    floating_type_mod::FT,
    simulation_parameters::{SimulationParams, ValidationError},
    V3, VI3,
};

/// Fraction of the smallest cell size that is subtracted when shifting
/// positions into grid space. Positions exactly on the upper wall then land
/// in the last cell instead of one past it.
const BOUNDARY_BIAS: FT = 1.0e-3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridDomain {
    half_extent: FT,
    resolution: [u32; 3],
    cell_size: V3,
    num_cells: u32,
    shift: FT,
}

impl GridDomain {
    pub fn new(half_extent: FT, resolution: [u32; 3]) -> Result<Self, ValidationError> {
        if !(half_extent > 0.) || !half_extent.is_finite() {
            return Err(ValidationError::NonPositiveWallPosition(half_extent));
        }
        if resolution.iter().any(|&r| r == 0) {
            return Err(ValidationError::ZeroGridResolution);
        }
        let num_cells = resolution.iter().map(|&r| r as u64).product::<u64>();
        if num_cells >= u32::MAX as u64 {
            return Err(ValidationError::GridTooLarge(resolution.iter().cloned().max().unwrap_or(0)));
        }

        let cell_size = V3::new(
            2. * half_extent / resolution[0] as FT,
            2. * half_extent / resolution[1] as FT,
            2. * half_extent / resolution[2] as FT,
        );
        let shift = half_extent - BOUNDARY_BIAS * cell_size.min();

        Ok(GridDomain {
            half_extent,
            resolution,
            cell_size,
            num_cells: num_cells as u32,
            shift,
        })
    }

    pub fn cubic(half_extent: FT, resolution: u32) -> Result<Self, ValidationError> {
        Self::new(half_extent, [resolution; 3])
    }

    pub fn from_params(params: &SimulationParams) -> Result<Self, ValidationError> {
        Self::cubic(params.wall_position, params.grid_resolution)
    }

    pub fn half_extent(&self) -> FT {
        self.half_extent
    }

    pub fn resolution(&self) -> [u32; 3] {
        self.resolution
    }

    pub fn cell_size(&self) -> V3 {
        self.cell_size
    }

    pub fn num_cells(&self) -> u32 {
        self.num_cells
    }

    /// Cell id of unused particle slots. Larger than every valid cell id.
    pub fn sentinel_cell_id(&self) -> u32 {
        self.num_cells
    }

    /**
     * Axis indices of the cell containing `pos`.
     *
     * No clamping happens here: positions outside the domain produce indices
     * outside `[0, resolution)`, which the caller has to guard against.
     */
    #[inline(always)]
    pub fn cell_index_3d(&self, pos: &V3) -> VI3 {
        VI3::new(
            ((pos.x + self.shift) / self.cell_size.x) as i32,
            ((pos.y + self.shift) / self.cell_size.y) as i32,
            ((pos.z + self.shift) / self.cell_size.z) as i32,
        )
    }

    /// Flattened cell id of `pos`, or `None` if the position is outside the grid.
    #[inline(always)]
    pub fn cell_index_1d(&self, pos: &V3) -> Option<u32> {
        let cell = self.cell_index_3d(pos);
        if self.is_valid_cell(&cell) {
            Some(self.flatten_cell(&cell))
        } else {
            None
        }
    }

    #[inline(always)]
    pub fn is_valid_cell(&self, cell: &VI3) -> bool {
        (0..3).all(|d| cell[d] >= 0 && (cell[d] as u32) < self.resolution[d])
    }

    /// Row-major flattening. `cell` has to be valid.
    #[inline(always)]
    pub fn flatten_cell(&self, cell: &VI3) -> u32 {
        debug_assert!(self.is_valid_cell(cell), "cell {:?} is outside the grid", cell);
        let [_, res_y, res_z] = self.resolution;
        cell.x as u32 * res_y * res_z + cell.y as u32 * res_z + cell.z as u32
    }

    #[inline(always)]
    pub fn clamp_cell(&self, cell: &VI3) -> VI3 {
        VI3::new(
            cell.x.clamp(0, self.resolution[0] as i32 - 1),
            cell.y.clamp(0, self.resolution[1] as i32 - 1),
            cell.z.clamp(0, self.resolution[2] as i32 - 1),
        )
    }

    /// x index of the layer that contains the plane `x = 0`.
    pub fn central_layer(&self) -> i32 {
        ((self.shift) / self.cell_size.x) as i32
    }
}

/**
 * Assign a cell id to every particle slot.
 *
 * Active particles outside the domain are clamped into the nearest border
 * cell so that they stay visible to neighbor queries. Slots from
 * `num_active` on get the sentinel id.
 */
pub fn assign_cell_ids(domain: &GridDomain, positions: &[V3], cell_ids: &mut [u32], num_active: usize) {
    assert_eq!(positions.len(), cell_ids.len());
    assert!(num_active <= positions.len());

    let sentinel = domain.sentinel_cell_id();
    par_iter_mut1(cell_ids, |i, p_cell_id| {
        *p_cell_id = if i < num_active {
            let cell = domain.clamp_cell(&domain.cell_index_3d(&positions[i]));
            domain.flatten_cell(&cell)
        } else {
            sentinel
        };
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{vec3f, vec3i};
    use proptest::prelude::*;

    #[test]
    fn cell_size_times_resolution_is_domain_width() {
        for res in [1, 2, 3, 7, 10, 64, 129] {
            for h in [0.5, 1., 10., 123.4] {
                let domain = GridDomain::cubic(h, res).unwrap();
                for d in 0..3 {
                    crate::assert_ft_approx_eq(domain.cell_size()[d] * res as FT, 2. * h, 1.0e-4 * h, || {
                        format!("cell size res={} h={}", res, h)
                    });
                }
            }
        }
    }

    #[test]
    fn positions_on_the_walls_map_to_border_cells() {
        let domain = GridDomain::cubic(10., 10).unwrap();
        assert_eq!(domain.cell_index_3d(&vec3f(10., 10., 10.)), vec3i(9, 9, 9));
        assert_eq!(domain.cell_index_3d(&vec3f(-10., -10., -10.)), vec3i(0, 0, 0));
        assert_eq!(domain.cell_index_3d(&vec3f(0.5, -0.5, 3.)), vec3i(5, 4, 6));
    }

    #[test]
    fn outside_positions_are_not_clamped() {
        let domain = GridDomain::cubic(10., 10).unwrap();
        let cell = domain.cell_index_3d(&vec3f(12.5, 0., 0.));
        assert_eq!(cell.x, 11);
        assert!(!domain.is_valid_cell(&cell));
        assert_eq!(domain.cell_index_1d(&vec3f(12.5, 0., 0.)), None);
    }

    #[test]
    fn flattening_is_row_major() {
        let domain = GridDomain::new(1., [2, 3, 4]).unwrap();
        assert_eq!(domain.num_cells(), 24);
        assert_eq!(domain.flatten_cell(&vec3i(0, 0, 1)), 1);
        assert_eq!(domain.flatten_cell(&vec3i(0, 1, 0)), 4);
        assert_eq!(domain.flatten_cell(&vec3i(1, 0, 0)), 12);
        assert_eq!(domain.flatten_cell(&vec3i(1, 2, 3)), 23);
        assert_eq!(domain.sentinel_cell_id(), 24);
    }

    #[test]
    fn central_layer_contains_the_origin() {
        for res in [1, 4, 5, 10, 11] {
            let domain = GridDomain::cubic(3., res).unwrap();
            assert_eq!(domain.central_layer(), domain.cell_index_3d(&V3::zeros()).x);
            assert!(domain.is_valid_cell(&vec3i(domain.central_layer(), 0, 0)));
        }
    }

    #[test]
    fn assign_cell_ids_uses_sentinel_for_inactive_slots() {
        let domain = GridDomain::cubic(10., 10).unwrap();
        let positions = vec![
            vec3f(-9.5, -9.5, -9.5),
            vec3f(15., 0.5, -20.),
            vec3f(1., 1., 1.),
            V3::from_element(FT::INFINITY),
        ];
        let mut cell_ids = vec![0; 4];
        assign_cell_ids(&domain, &positions, &mut cell_ids, 3);

        assert_eq!(cell_ids[0], 0);
        assert_eq!(cell_ids[1], domain.flatten_cell(&vec3i(9, 5, 0)));
        assert_eq!(cell_ids[2], domain.flatten_cell(&vec3i(5, 5, 5)));
        assert_eq!(cell_ids[3], domain.sentinel_cell_id());
    }

    #[test]
    fn invalid_domains_are_rejected() {
        assert!(GridDomain::cubic(0., 10).is_err());
        assert!(GridDomain::cubic(-1., 10).is_err());
        assert!(GridDomain::new(1., [4, 0, 4]).is_err());
    }

    proptest! {
        #[test]
        fn inside_positions_map_into_the_grid(
            h in 0.1f32..500.,
            res in 1u32..200,
            fx in -0.999999f32..0.999999,
            fy in -0.999999f32..0.999999,
            fz in -0.999999f32..0.999999,
        ) {
            let domain = GridDomain::cubic(h as FT, res).unwrap();
            let pos = vec3f(fx as FT, fy as FT, fz as FT) * h as FT;
            let cell = domain.cell_index_3d(&pos);
            prop_assert!(domain.is_valid_cell(&cell), "pos {:?} -> cell {:?}", pos, cell);
            prop_assert!(domain.cell_index_1d(&pos).unwrap() < domain.num_cells());
        }
    }
}
