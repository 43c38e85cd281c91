//! 8-connected region labelling over a binary mask.

use super::morphology::BinaryMask;

/// Raw statistics of one connected region.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct RegionStats {
    pub min_x: usize,
    pub min_y: usize,
    pub max_x: usize,
    pub max_y: usize,
    pub pixels: u64,
    pub sum_x: u64,
    pub sum_y: u64,
    pub sum_delta: u64,
}

impl RegionStats {
    fn seed(x: usize, y: usize) -> Self {
        Self {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
            pixels: 0,
            sum_x: 0,
            sum_y: 0,
            sum_delta: 0,
        }
    }

    fn absorb(&mut self, x: usize, y: usize, delta: u8) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
        self.pixels += 1;
        self.sum_x += x as u64;
        self.sum_y += y as u64;
        self.sum_delta += delta as u64;
    }
}

/// Label every set pixel of `mask` and aggregate per-region stats.
///
/// `delta` is the absolute difference image the mask was derived from; it
/// must have the same dimensions as the mask. Regions come out in raster
/// order of their first pixel.
pub(crate) fn label_regions(mask: &BinaryMask, delta: &[u8]) -> Vec<RegionStats> {
    let width = mask.width();
    let height = mask.height();
    debug_assert_eq!(delta.len(), width * height);

    let mut visited = vec![false; width * height];
    let mut regions = Vec::new();
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for y in 0..height {
        for x in 0..width {
            let idx = y * width + x;
            if visited[idx] || !mask.get(x, y) {
                continue;
            }

            let mut stats = RegionStats::seed(x, y);
            visited[idx] = true;
            stack.push((x, y));

            while let Some((cx, cy)) = stack.pop() {
                stats.absorb(cx, cy, delta[cy * width + cx]);

                let x_lo = cx.saturating_sub(1);
                let y_lo = cy.saturating_sub(1);
                let x_hi = (cx + 1).min(width - 1);
                let y_hi = (cy + 1).min(height - 1);
                for ny in y_lo..=y_hi {
                    for nx in x_lo..=x_hi {
                        let n = ny * width + nx;
                        if !visited[n] && mask.get(nx, ny) {
                            visited[n] = true;
                            stack.push((nx, ny));
                        }
                    }
                }
            }

            regions.push(stats);
        }
    }

    regions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagonal_pixels_join_one_region() {
        let mut mask = BinaryMask::new(4, 4);
        mask.set(0, 0, true);
        mask.set(1, 1, true);
        mask.set(2, 2, true);
        let delta = vec![90u8; 16];
        let regions = label_regions(&mask, &delta);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].pixels, 3);
        assert_eq!(regions[0].sum_delta, 270);
    }

    #[test]
    fn separated_blocks_are_distinct() {
        let mut mask = BinaryMask::new(6, 2);
        mask.set(0, 0, true);
        mask.set(5, 1, true);
        let regions = label_regions(&mask, &[0u8; 12]);
        assert_eq!(regions.len(), 2);
        assert_eq!((regions[0].min_x, regions[0].min_y), (0, 0));
        assert_eq!((regions[1].min_x, regions[1].min_y), (5, 1));
    }
}
