//! Binary mask operations: thresholding and square-element morphology.
//!
//! Pixels outside the frame are ignored: they never switch a pixel on during
//! dilation and never switch one off during erosion.

use crate::error::{CoreError, CoreResult, Stage};

/// Row-major binary mask.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BinaryMask {
    width: usize,
    height: usize,
    bits: Vec<bool>,
}

impl BinaryMask {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            bits: vec![false; width * height],
        }
    }

    /// `diff[i] > threshold` becomes set. `diff` must be `width * height` long.
    pub fn threshold(
        diff: &[u8],
        width: usize,
        height: usize,
        threshold: u8,
    ) -> CoreResult<Self> {
        if width.checked_mul(height) != Some(diff.len()) {
            return Err(CoreError::input(
                Stage::Extract,
                format!(
                    "difference buffer has {} pixels, expected {}x{}",
                    diff.len(),
                    width,
                    height
                ),
            ));
        }
        Ok(Self {
            width,
            height,
            bits: diff.iter().map(|&d| d > threshold).collect(),
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> bool {
        self.bits[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: bool) {
        self.bits[y * self.width + x] = value;
    }

    pub fn count(&self) -> usize {
        self.bits.iter().filter(|&&b| b).count()
    }

    pub fn dilate(&self, size: u32) -> Self {
        self.sweep(size, |window| window.iter().any(|&b| b))
    }

    pub fn erode(&self, size: u32) -> Self {
        self.sweep(size, |window| window.iter().all(|&b| b))
    }

    /// Dilate then erode: fills gaps narrower than the element.
    pub fn close(&self, size: u32) -> Self {
        self.dilate(size).erode(size)
    }

    /// Erode then dilate: drops specks smaller than the element.
    pub fn open(&self, size: u32) -> Self {
        self.erode(size).dilate(size)
    }

    // Square elements are separable: one horizontal pass, one vertical pass.
    fn sweep(&self, size: u32, reduce: impl Fn(&[bool]) -> bool) -> Self {
        if size <= 1 || self.bits.is_empty() {
            return self.clone();
        }
        let size = size as usize;
        let before = size / 2;
        let after = size - 1 - before;

        let mut horizontal = BinaryMask::new(self.width, self.height);
        let mut row = Vec::with_capacity(self.width);
        for y in 0..self.height {
            row.clear();
            row.extend_from_slice(&self.bits[y * self.width..(y + 1) * self.width]);
            for x in 0..self.width {
                let lo = x.saturating_sub(before);
                let hi = (x + after).min(self.width - 1);
                horizontal.set(x, y, reduce(&row[lo..=hi]));
            }
        }

        let mut out = BinaryMask::new(self.width, self.height);
        let mut column = Vec::with_capacity(self.height);
        for x in 0..self.width {
            column.clear();
            column.extend((0..self.height).map(|y| horizontal.get(x, y)));
            for y in 0..self.height {
                let lo = y.saturating_sub(before);
                let hi = (y + after).min(self.height - 1);
                out.set(x, y, reduce(&column[lo..=hi]));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_from(rows: &[&str]) -> BinaryMask {
        let height = rows.len();
        let width = rows[0].len();
        let mut mask = BinaryMask::new(width, height);
        for (y, row) in rows.iter().enumerate() {
            for (x, c) in row.chars().enumerate() {
                mask.set(x, y, c == '#');
            }
        }
        mask
    }

    #[test]
    fn threshold_is_strict_and_checks_length() {
        let mask = BinaryMask::threshold(&[10, 30, 31, 200], 2, 2, 30).unwrap();
        assert!(!mask.get(1, 0));
        assert!(mask.get(0, 1) && mask.get(1, 1));
        assert_eq!(mask.count(), 2);

        for (w, h) in [(3, 2), (1, 3), (usize::MAX, 2)] {
            let err = BinaryMask::threshold(&[0; 4], w, h, 30).unwrap_err();
            assert!(matches!(err, CoreError::Input { .. }), "{}x{}", w, h);
        }
    }

    #[test]
    fn closing_fills_single_pixel_gap() {
        let mask = mask_from(&[
            ".......", //
            ".##.##.",
            ".##.##.",
            ".......",
        ]);
        let closed = mask.close(3);
        assert!(closed.get(3, 1));
        assert!(closed.get(3, 2));
    }

    #[test]
    fn opening_removes_speck() {
        let mask = mask_from(&[
            ".....", //
            "..#..",
            ".....",
        ]);
        assert_eq!(mask.open(3).count(), 0);
    }

    #[test]
    fn full_frame_survives_morphology() {
        let mut mask = BinaryMask::new(6, 5);
        for y in 0..5 {
            for x in 0..6 {
                mask.set(x, y, true);
            }
        }
        assert_eq!(mask.close(3).open(3).count(), 30);
    }

    #[test]
    fn unit_element_is_identity() {
        let mask = mask_from(&["#.#", ".#."]);
        assert_eq!(mask.dilate(1), mask);
        assert_eq!(mask.erode(0), mask);
    }
}
