/*!
Per-cell index ranges into the sorted particle order.

A range is a closed interval `[start, end]`. Empty cells hold the marker
`(1, 0)` (`start > end`); `(0, 0)` is a legitimate range containing only the
first sorted particle.
*/

use crate::{
    concurrency::{par_iter_mut0, par_iter_mut1},
    thread_safe_ptr::ThreadSafeMutPtr,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRange {
    pub start: u32,
    pub end: u32,
}

impl CellRange {
    pub const EMPTY: CellRange = CellRange { start: 1, end: 0 };

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            (self.end - self.start + 1) as usize
        }
    }

    /// Sorted particle indices of this cell (empty for the empty marker).
    #[inline(always)]
    pub fn indices(&self) -> std::ops::RangeInclusive<usize> {
        self.start as usize..=self.end as usize
    }
}

pub struct CellRanges {
    ranges: Vec<CellRange>,
}

impl CellRanges {
    pub fn new(num_cells: u32) -> Self {
        CellRanges {
            ranges: vec![CellRange::EMPTY; num_cells as usize],
        }
    }

    pub fn num_cells(&self) -> u32 {
        self.ranges.len() as u32
    }

    #[inline(always)]
    pub fn get(&self, cell_id: u32) -> CellRange {
        self.ranges[cell_id as usize]
    }

    pub fn num_occupied_cells(&self) -> usize {
        self.ranges.iter().filter(|r| !r.is_empty()).count()
    }

    /**
     * Rebuild all ranges from the cell ids of the sorted particle slots.
     *
     * Ids `>= num_cells` (sentinels) never produce a range. With
     * `max_parts_in_cell`, every range is truncated to at most that many
     * particles, dropping the tail of the cell.
     */
    pub fn build(&mut self, sorted_cell_ids: &[u32], max_parts_in_cell: Option<u32>) {
        debug_assert!(
            sorted_cell_ids.windows(2).all(|w| w[0] <= w[1]),
            "cell ids have to be sorted"
        );

        self.flush();
        self.mark_starts(sorted_cell_ids);
        self.mark_ends(sorted_cell_ids);
        if let Some(max_parts_in_cell) = max_parts_in_cell {
            self.cap(max_parts_in_cell);
        }
    }

    fn flush(&mut self) {
        par_iter_mut1(&mut self.ranges, |_, range| {
            *range = CellRange::EMPTY;
        });
    }

    /// A slot starts a cell if its predecessor belongs to a different cell.
    /// Slot 0 has no predecessor and always starts its cell, the flush marker
    /// alone would leave `start = 1` and hide the first sorted particle.
    fn mark_starts(&mut self, ids: &[u32]) {
        let num_cells = self.num_cells();
        let ranges = ThreadSafeMutPtr::new(self.ranges.as_mut_ptr());
        par_iter_mut0(ids.len(), |i| {
            let id = ids[i];
            if id >= num_cells {
                return;
            }
            if i == 0 || ids[i - 1] != id {
                // SAFETY: in sorted ids exactly one slot starts each cell
                unsafe {
                    ranges.get_mut(id as usize).start = i as u32;
                }
            }
        });
    }

    fn mark_ends(&mut self, ids: &[u32]) {
        let num_cells = self.num_cells();
        let ranges = ThreadSafeMutPtr::new(self.ranges.as_mut_ptr());
        par_iter_mut0(ids.len(), |i| {
            let id = ids[i];
            if id >= num_cells {
                return;
            }
            if i + 1 == ids.len() || ids[i + 1] != id {
                // SAFETY: in sorted ids exactly one slot ends each cell
                unsafe {
                    ranges.get_mut(id as usize).end = i as u32;
                }
            }
        });
    }

    fn cap(&mut self, max_parts_in_cell: u32) {
        assert!(max_parts_in_cell > 0);
        par_iter_mut1(&mut self.ranges, |_, range| {
            if !range.is_empty() {
                range.end = u32::min(range.end, range.start.saturating_add(max_parts_in_cell - 1));
            }
        });
    }
}
