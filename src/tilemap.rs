/// A bounded 2D grid stored row-major.
///
/// Unlike a planet map this grid does not wrap: cells outside
/// `0..width` x `0..height` simply do not exist, which is what the
/// erosion boundary conditions expect.
#[derive(Clone, Debug, PartialEq)]
pub struct Tilemap<T> {
    pub width: usize,
    pub height: usize,
    data: Vec<T>,
}

impl<T: Clone> Tilemap<T> {
    pub fn new_with(width: usize, height: usize, value: T) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }

    /// Build a map by evaluating `f(x, y)` for every cell.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self { width, height, data }
    }

    #[inline]
    pub fn index(&self, x: usize, y: usize) -> usize {
        debug_assert!(x < self.width && y < self.height);
        y * self.width + x
    }

    pub fn get(&self, x: usize, y: usize) -> &T {
        &self.data[self.index(x, y)]
    }

    pub fn set(&mut self, x: usize, y: usize, value: T) {
        let idx = self.index(x, y);
        self.data[idx] = value;
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }
}

impl Tilemap<f32> {
    /// Minimum and maximum value, ignoring NaNs.
    pub fn min_max(&self) -> (f32, f32) {
        let mut min_h = f32::MAX;
        let mut max_h = f32::MIN;
        for &h in &self.data {
            if h < min_h { min_h = h; }
            if h > max_h { max_h = h; }
        }
        (min_h, max_h)
    }

    /// Sample using bilinear interpolation, clamping at the edges.
    pub fn sample_bilinear(&self, x: f32, y: f32) -> f32 {
        let max_x = (self.width - 1) as f32;
        let max_y = (self.height - 1) as f32;
        let x = x.clamp(0.0, max_x);
        let y = y.clamp(0.0, max_y);

        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);

        let fx = x - x0 as f32;
        let fy = y - y0 as f32;

        let h00 = *self.get(x0, y0);
        let h10 = *self.get(x1, y0);
        let h01 = *self.get(x0, y1);
        let h11 = *self.get(x1, y1);

        let h0 = h00 * (1.0 - fx) + h10 * fx;
        let h1 = h01 * (1.0 - fx) + h11 * fx;
        h0 * (1.0 - fy) + h1 * fy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_fn_is_row_major() {
        let mut map = Tilemap::from_fn(3, 2, |x, y| (y * 3 + x) as f32);
        assert_eq!(*map.get(2, 1), 5.0);
        assert_eq!(map.as_slice()[map.index(1, 1)], 4.0);
        map.set(0, 1, -1.0);
        assert_eq!(map.as_slice()[3], -1.0);
        assert_eq!(map.min_max(), (-1.0, 5.0));
    }

    #[test]
    fn test_bilinear_midpoint() {
        let map = Tilemap::from_fn(2, 2, |x, _| x as f32);
        assert!((map.sample_bilinear(0.5, 0.5) - 0.5).abs() < 1e-6);
        assert_eq!(map.sample_bilinear(-3.0, 9.0), 0.0);
        assert_eq!(map.min_max(), (0.0, 1.0));
    }
}
