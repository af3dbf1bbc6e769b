//! Double-buffered per-cell grids.
//!
//! Every quantity lives in its own flat array (structure-of-arrays). Two
//! complete `BufferSet`s exist for the lifetime of the simulation; the
//! `active` index names the authoritative (read) set and a step writes the
//! other one. Swapping flips the index and never copies data.

use crate::tilemap::Tilemap;

/// Outflow directions, in the order flux components are stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Top = 0,
    Right = 1,
    Bottom = 2,
    Left = 3,
}

impl Direction {
    pub const ALL: [Direction; 4] = [Direction::Top, Direction::Right, Direction::Bottom, Direction::Left];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    #[inline]
    pub fn offset(self) -> (i64, i64) {
        match self {
            Direction::Top => (0, -1),
            Direction::Right => (1, 0),
            Direction::Bottom => (0, 1),
            Direction::Left => (-1, 0),
        }
    }

    #[inline]
    pub fn opposite(self) -> Direction {
        match self {
            Direction::Top => Direction::Bottom,
            Direction::Right => Direction::Left,
            Direction::Bottom => Direction::Top,
            Direction::Left => Direction::Right,
        }
    }
}

/// Grid resolution and index arithmetic shared by all passes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridDims {
    pub width: usize,
    pub height: usize,
}

impl GridDims {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    #[inline]
    pub fn cells(&self) -> usize {
        self.width * self.height
    }

    #[inline]
    pub fn index(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }

    #[inline]
    pub fn coords(&self, index: usize) -> (usize, usize) {
        (index % self.width, index / self.width)
    }

    /// Index of the cell one step in `dir`, or `None` past the edge.
    #[inline]
    pub fn neighbor(&self, x: usize, y: usize, dir: Direction) -> Option<usize> {
        let (dx, dy) = dir.offset();
        self.offset(x, y, dx, dy)
    }

    #[inline]
    pub fn offset(&self, x: usize, y: usize, dx: i64, dy: i64) -> Option<usize> {
        let nx = x as i64 + dx;
        let ny = y as i64 + dy;
        if nx < 0 || ny < 0 || nx >= self.width as i64 || ny >= self.height as i64 {
            None
        } else {
            Some(ny as usize * self.width + nx as usize)
        }
    }
}

/// One complete copy of the simulation grids.
#[derive(Clone, Debug, PartialEq)]
pub struct BufferSet {
    pub height: Vec<f32>,
    pub water: Vec<f32>,
    pub sediment: Vec<f32>,
    pub velocity: Vec<[f32; 2]>,
    /// Outflow toward (top, right, bottom, left)
    pub flux: Vec<[f32; 4]>,
}

impl BufferSet {
    fn zeroed(cells: usize) -> Self {
        Self {
            height: vec![0.0; cells],
            water: vec![0.0; cells],
            sediment: vec![0.0; cells],
            velocity: vec![[0.0; 2]; cells],
            flux: vec![[0.0; 4]; cells],
        }
    }

    /// Zero everything except terrain height.
    pub fn clear_dynamic(&mut self) {
        self.water.fill(0.0);
        self.sediment.fill(0.0);
        self.velocity.fill([0.0; 2]);
        self.flux.fill([0.0; 4]);
    }
}

/// Owner of the two buffer sets.
pub struct HeightFieldState {
    dims: GridDims,
    sets: [BufferSet; 2],
    active: usize,
}

impl HeightFieldState {
    pub fn new(dims: GridDims) -> Self {
        let cells = dims.cells();
        Self {
            dims,
            sets: [BufferSet::zeroed(cells), BufferSet::zeroed(cells)],
            active: 0,
        }
    }

    pub fn dims(&self) -> GridDims {
        self.dims
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    /// The authoritative set: state at the end of the last step.
    pub fn read(&self) -> &BufferSet {
        &self.sets[self.active]
    }

    /// Direct access to the authoritative set, for seeding state between
    /// steps. Never call this while a step is in flight.
    pub fn read_mut(&mut self) -> &mut BufferSet {
        &mut self.sets[self.active]
    }

    /// Borrow the read set immutably and the write set mutably at once.
    pub fn split(&mut self) -> (&BufferSet, &mut BufferSet) {
        let (first, second) = self.sets.split_at_mut(1);
        if self.active == 0 {
            (&first[0], &mut second[0])
        } else {
            (&second[0], &mut first[0])
        }
    }

    /// Make the write set authoritative.
    pub fn swap(&mut self) {
        self.active ^= 1;
    }

    /// Copy terrain into both sets and clear every dynamic field.
    /// `heights` must already be validated and have `dims.cells()` entries.
    pub fn load_heights(&mut self, heights: &[f32]) {
        debug_assert_eq!(heights.len(), self.dims.cells());
        for set in &mut self.sets {
            set.height.copy_from_slice(heights);
            set.clear_dynamic();
        }
        self.active = 0;
    }

    pub fn clear_dynamic(&mut self) {
        for set in &mut self.sets {
            set.clear_dynamic();
        }
    }

    pub fn snapshot(&self) -> FieldSnapshot {
        let read = self.read();
        FieldSnapshot {
            dims: self.dims,
            height: read.height.clone(),
            water: read.water.clone(),
            sediment: read.sediment.clone(),
            velocity: read.velocity.clone(),
            flux: read.flux.clone(),
        }
    }
}

/// Owned copy of the authoritative grids, for inspection and tests.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldSnapshot {
    pub dims: GridDims,
    pub height: Vec<f32>,
    pub water: Vec<f32>,
    pub sediment: Vec<f32>,
    pub velocity: Vec<[f32; 2]>,
    pub flux: Vec<[f32; 4]>,
}

impl FieldSnapshot {
    pub fn totals(&self) -> FieldTotals {
        FieldTotals::from_fields(&self.height, &self.water, &self.sediment, &self.velocity)
    }

    pub fn height_map(&self) -> Tilemap<f32> {
        Tilemap::from_fn(self.dims.width, self.dims.height, |x, y| self.height[self.dims.index(x, y)])
    }

    pub fn water_map(&self) -> Tilemap<f32> {
        Tilemap::from_fn(self.dims.width, self.dims.height, |x, y| self.water[self.dims.index(x, y)])
    }
}

/// Grid-wide sums used for logging and conservation checks.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FieldTotals {
    pub height: f64,
    pub water: f64,
    pub sediment: f64,
    pub max_speed: f32,
}

impl FieldTotals {
    pub fn from_fields(height: &[f32], water: &[f32], sediment: &[f32], velocity: &[[f32; 2]]) -> Self {
        let sum = |values: &[f32]| values.iter().map(|&v| v as f64).sum::<f64>();
        let max_speed = velocity
            .iter()
            .map(|v| (v[0] * v[0] + v[1] * v[1]).sqrt())
            .fold(0.0f32, f32::max);
        Self {
            height: sum(height),
            water: sum(water),
            sediment: sum(sediment),
            max_speed,
        }
    }

    /// Terrain plus suspended material.
    pub fn solid(&self) -> f64 {
        self.height + self.sediment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_flips_sets_without_copying() {
        let mut state = HeightFieldState::new(GridDims::new(3, 2));
        {
            let (read, write) = state.split();
            assert_eq!(read.height.len(), 6);
            write.height[4] = 7.0;
        }
        assert_eq!(state.read().height[4], 0.0);
        state.swap();
        assert_eq!(state.active_index(), 1);
        assert_eq!(state.read().height[4], 7.0);
        state.swap();
        assert_eq!(state.read().height[4], 0.0);
    }

    #[test]
    fn test_load_heights_clears_dynamic_fields() {
        let mut state = HeightFieldState::new(GridDims::new(2, 2));
        state.read_mut().water[1] = 3.0;
        state.read_mut().flux[2] = [1.0, 2.0, 3.0, 4.0];
        state.swap();

        state.load_heights(&[0.1, 0.2, 0.3, 0.4]);
        assert_eq!(state.active_index(), 0);
        for _ in 0..2 {
            let set = state.read();
            assert_eq!(set.height, vec![0.1, 0.2, 0.3, 0.4]);
            assert!(set.water.iter().all(|&w| w == 0.0));
            assert!(set.flux.iter().all(|f| *f == [0.0; 4]));
            state.swap();
        }
    }

    #[test]
    fn test_neighbor_respects_edges() {
        let dims = GridDims::new(4, 3);
        assert_eq!(dims.neighbor(0, 0, Direction::Top), None);
        assert_eq!(dims.neighbor(0, 0, Direction::Left), None);
        assert_eq!(dims.neighbor(0, 0, Direction::Right), Some(1));
        assert_eq!(dims.neighbor(3, 2, Direction::Bottom), None);
        assert_eq!(dims.neighbor(1, 1, Direction::Bottom), Some(9));
        for dir in Direction::ALL {
            assert_eq!(dir.opposite().opposite(), dir);
        }
    }
}
