/*!
Grid neighbor traversal shared by all solvers.

A query visits the 3x3x3 block of cells around the cell of the query
position (or the 1x3x3 slab in the central x-layer in 2D mode) and walks the
inclusive index range of every visited cell in the sorted particle order.
Cells outside the grid are skipped. The query particle itself is visited as
well; callers mask zero displacements where they would divide by them.
*/

use log::debug;
use rstar::{primitives::GeomWithData, RTree};

use crate::{
    cell_ranges::CellRanges,
    concurrency::par_iter_mut0,
    floating_type_mod::FT,
    grid::GridDomain,
    simulation_parameters::Dimension,
    vec3i, V3, VI3,
};

#[derive(Clone, Copy)]
pub struct NeighborhoodGrid<'a> {
    domain: &'a GridDomain,
    ranges: &'a CellRanges,
    dimension: Dimension,
}

impl<'a> NeighborhoodGrid<'a> {
    pub fn new(domain: &'a GridDomain, ranges: &'a CellRanges, dimension: Dimension) -> Self {
        assert_eq!(domain.num_cells(), ranges.num_cells());
        NeighborhoodGrid {
            domain,
            ranges,
            dimension,
        }
    }

    /// Cell the stencil of `pos` is centered on. Positions outside the
    /// domain use the nearest border cell, matching their cell id.
    #[inline(always)]
    pub fn center_cell(&self, pos: &V3) -> VI3 {
        self.domain.clamp_cell(&self.domain.cell_index_3d(pos))
    }

    /// Calls `f` with the flattened id of every valid cell in the stencil
    /// around `center`.
    #[inline(always)]
    pub fn for_each_cell(&self, center: VI3, mut f: impl FnMut(u32)) {
        let x_offsets = match self.dimension {
            Dimension::Dim3D => -1..=1,
            Dimension::Dim2D => 0..=0,
        };
        for dx in x_offsets {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    let cell = match self.dimension {
                        Dimension::Dim3D => center + vec3i(dx, dy, dz),
                        Dimension::Dim2D => vec3i(self.domain.central_layer(), center.y + dy, center.z + dz),
                    };
                    if self.domain.is_valid_cell(&cell) {
                        f(self.domain.flatten_cell(&cell));
                    }
                }
            }
        }
    }

    /// Calls `f` with the sorted index of every particle in the stencil
    /// around `pos`, including the particle at `pos` itself.
    #[inline(always)]
    pub fn for_each_neighbor(&self, pos: &V3, mut f: impl FnMut(usize)) {
        self.for_each_cell(self.center_cell(pos), |cell_id| {
            let range = self.ranges.get(cell_id);
            if !range.is_empty() {
                for j in range.indices() {
                    f(j);
                }
            }
        });
    }
}

/**
 * Compares the grid neighbors within `radius` of every active particle with
 * an R-tree radius query. Panics on the first particle whose sets differ.
 *
 * Only meaningful for uncapped cell ranges and `radius <= cell size`.
 */
pub fn check_neighborhood(grid: &NeighborhoodGrid, positions: &[V3], radius: FT) {
    debug!("=====> SLOW: CHECK R-STAR NEIGHBORHOOD <=====");

    let radius_sq = radius * radius;
    let rtree_elems: Vec<GeomWithData<[FT; 3], usize>> = positions
        .iter()
        .enumerate()
        .map(|(idx, pos)| GeomWithData::new([pos.x, pos.y, pos.z], idx))
        .collect();
    let rtree = RTree::bulk_load(rtree_elems);

    // in 2D the stencil only covers the central layer
    let visible = |j: usize| match grid.dimension {
        Dimension::Dim3D => true,
        Dimension::Dim2D => grid.center_cell(&positions[j]).x == grid.domain.central_layer(),
    };

    par_iter_mut0(positions.len(), |i| {
        let pos = positions[i];
        let within = |j: usize| (positions[j] - pos).norm_squared() < radius_sq;

        let mut from_grid = Vec::new();
        grid.for_each_neighbor(&pos, |j| {
            if j < positions.len() && within(j) {
                from_grid.push(j);
            }
        });

        let mut from_rtree: Vec<usize> = rtree
            .locate_within_distance([pos.x, pos.y, pos.z], radius_sq)
            .map(|elem| elem.data)
            .filter(|&j| within(j) && visible(j))
            .collect();

        from_grid.sort_unstable();
        from_rtree.sort_unstable();
        assert_eq!(
            from_grid, from_rtree,
            "grid neighbor search bug: particle {} at {:?} has different neighbors than the r-tree query",
            i, pos
        );
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{grid::assign_cell_ids, vec3f};

    fn visited_cells(domain: &GridDomain, dimension: Dimension, center: VI3) -> Vec<u32> {
        let ranges = CellRanges::new(domain.num_cells());
        let grid = NeighborhoodGrid::new(domain, &ranges, dimension);
        let mut cells = Vec::new();
        grid.for_each_cell(center, |c| cells.push(c));
        cells
    }

    #[test]
    fn corner_cell_visits_eight_cells() {
        let domain = GridDomain::cubic(10., 10).unwrap();
        let cells = visited_cells(&domain, Dimension::Dim3D, vec3i(0, 0, 0));
        assert_eq!(cells.len(), 8);
        let mut expected: Vec<u32> = [(0, 0, 0), (0, 0, 1), (0, 1, 0), (0, 1, 1), (1, 0, 0), (1, 0, 1), (1, 1, 0), (1, 1, 1)]
            .iter()
            .map(|&(x, y, z)| domain.flatten_cell(&vec3i(x, y, z)))
            .collect();
        expected.sort_unstable();
        let mut cells = cells;
        cells.sort_unstable();
        assert_eq!(cells, expected);
    }

    #[test]
    fn interior_and_edge_cells() {
        let domain = GridDomain::cubic(10., 10).unwrap();
        assert_eq!(visited_cells(&domain, Dimension::Dim3D, vec3i(4, 5, 6)).len(), 27);
        assert_eq!(visited_cells(&domain, Dimension::Dim3D, vec3i(9, 5, 6)).len(), 18);
        assert_eq!(visited_cells(&domain, Dimension::Dim3D, vec3i(9, 9, 6)).len(), 12);
    }

    #[test]
    fn plane_mode_visits_the_central_slab() {
        let domain = GridDomain::cubic(10., 10).unwrap();
        let layer = domain.central_layer();

        let cells = visited_cells(&domain, Dimension::Dim2D, vec3i(2, 4, 4));
        assert_eq!(cells.len(), 9);
        for y in 3..=5 {
            for z in 3..=5 {
                assert!(cells.contains(&domain.flatten_cell(&vec3i(layer, y, z))));
            }
        }

        assert_eq!(visited_cells(&domain, Dimension::Dim2D, vec3i(layer, 0, 9)).len(), 4);
    }

    #[test]
    fn neighbors_are_visited_through_cell_ranges() {
        let domain = GridDomain::cubic(4., 4).unwrap();
        // already sorted by cell id
        let positions = vec![
            vec3f(-3.5, -3.5, -3.5),
            vec3f(-3.0, -3.5, -1.5),
            vec3f(-1.5, -1.5, -1.5),
            vec3f(3.5, 3.5, 3.5),
        ];
        let mut cell_ids = vec![0; 4];
        assign_cell_ids(&domain, &positions, &mut cell_ids, 4);
        assert!(cell_ids.windows(2).all(|w| w[0] <= w[1]));

        let mut ranges = CellRanges::new(domain.num_cells());
        ranges.build(&cell_ids, None);
        let grid = NeighborhoodGrid::new(&domain, &ranges, Dimension::Dim3D);

        let mut found = Vec::new();
        grid.for_each_neighbor(&positions[0], |j| found.push(j));
        found.sort_unstable();
        assert_eq!(found, vec![0, 1, 2]);

        let mut found = Vec::new();
        grid.for_each_neighbor(&positions[3], |j| found.push(j));
        assert_eq!(found, vec![3]);
    }

    #[test]
    fn rtree_check_accepts_grid_neighbors() {
        let domain = GridDomain::cubic(5., 5).unwrap();
        let mut positions: Vec<V3> = (0..300)
            .map(|i| {
                let t = i as FT * 0.37;
                vec3f(4.9 * t.sin(), 4.9 * (1.3 * t).cos(), 4.9 * (0.7 * t).sin())
            })
            .collect();
        let mut cell_ids = vec![0; positions.len()];
        assign_cell_ids(&domain, &positions, &mut cell_ids, positions.len());

        let mut order: Vec<usize> = (0..positions.len()).collect();
        order.sort_by_key(|&i| cell_ids[i]);
        positions = order.iter().map(|&i| positions[i]).collect();
        cell_ids = order.iter().map(|&i| cell_ids[i]).collect();

        let mut ranges = CellRanges::new(domain.num_cells());
        ranges.build(&cell_ids, None);
        let grid = NeighborhoodGrid::new(&domain, &ranges, Dimension::Dim3D);
        check_neighborhood(&grid, &positions, 2.);
    }
}
