//! Saturated-pixel isolation for feature detection.
//!
//! Detectors latch onto saturated stars and hot pixels as strong texture. Before
//! detection every 1-D peak above the threshold is pinned to the maximum value
//! so all of them look like the same bright point marker; afterwards the saved
//! values are put back. Isolation only ever touches the scratch detection
//! plane, never the calibrated frame that gets stacked.

use ndarray::Array2;

use crate::consts::{HOT_PIXEL_THRESHOLD, WORKING_MAX, WORKING_MIDPOINT};

/// A pixel that was pinned to the maximum value, with its previous value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HotPixel {
    pub row: usize,
    pub col: usize,
    pub value: u16,
}

#[derive(Clone, Copy, Debug)]
pub struct HotPixelIsolator {
    /// Minimum peak height.
    pub threshold: u16,
}

impl Default for HotPixelIsolator {
    fn default() -> Self {
        Self {
            threshold: HOT_PIXEL_THRESHOLD,
        }
    }
}

/// Pixels pinned by [`HotPixelIsolator::isolate`], needed to undo it.
#[derive(Clone, Debug, Default)]
pub struct IsolatedPixels {
    pixels: Vec<HotPixel>,
}

impl IsolatedPixels {
    pub fn pixels(&self) -> &[HotPixel] {
        &self.pixels
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Put the saved values back.
    pub fn restore(&self, plane: &mut Array2<u16>) {
        for px in &self.pixels {
            plane[[px.row, px.col]] = px.value;
        }
    }
}

impl HotPixelIsolator {
    /// Normalize the plane's range and pin its saturated peaks.
    ///
    /// The rescale is not undone by [`IsolatedPixels::restore`]; the restored
    /// values are the rescaled ones.
    pub fn isolate(&self, plane: &mut Array2<u16>) -> IsolatedPixels {
        let max = plane.iter().copied().max().unwrap_or(0);
        if let Some(scale) = rescale_factor(max) {
            plane.mapv_inplace(|v| (v as f32 * scale).round().min(WORKING_MAX as f32) as u16);
        }

        let width = plane.ncols();
        let flat: Vec<u16> = plane.iter().copied().collect();
        let pixels: Vec<HotPixel> = find_peaks(&flat, self.threshold)
            .into_iter()
            .map(|idx| HotPixel {
                row: idx / width,
                col: idx % width,
                value: flat[idx],
            })
            .collect();

        for px in &pixels {
            plane[[px.row, px.col]] = WORKING_MAX;
        }

        IsolatedPixels { pixels }
    }

    /// Run `detect` on the isolated plane and restore it afterwards.
    pub fn with_isolated<T>(&self, plane: &mut Array2<u16>, detect: impl FnOnce(&Array2<u16>) -> T) -> T {
        let isolated = self.isolate(plane);
        let result = detect(plane);
        isolated.restore(plane);
        result
    }
}

/// Ratio that lifts data of a lower bit depth to the full 16-bit range.
///
/// Returns `None` when the data already reaches the working midpoint or is
/// all zero. The source depth is the smallest one (from 8 bits up) that
/// holds `max`, so 8-bit data scales by 257.
pub fn rescale_factor(max: u16) -> Option<f32> {
    if max == 0 || max >= WORKING_MIDPOINT {
        return None;
    }
    let bits = (8..16u32).find(|&b| (max as u32) < (1 << b))?;
    Some(WORKING_MAX as f32 / ((1u32 << bits) - 1) as f32)
}

/// Indices of local maxima in a 1-D signal with height >= `min_height`.
///
/// A peak is strictly greater than its left neighbour and greater than the
/// first differing sample to its right. Flat plateaus report their middle
/// sample (rounded down). The first and last samples are never peaks.
pub fn find_peaks(signal: &[u16], min_height: u16) -> Vec<usize> {
    let mut peaks = Vec::new();
    let n = signal.len();
    if n < 3 {
        return peaks;
    }

    let mut i = 1;
    let last = n - 1;
    while i < last {
        if signal[i - 1] < signal[i] {
            let mut ahead = i + 1;
            while ahead < last && signal[ahead] == signal[i] {
                ahead += 1;
            }
            if signal[ahead] < signal[i] {
                let mid = (i + ahead - 1) / 2;
                if signal[mid] >= min_height {
                    peaks.push(mid);
                }
                i = ahead;
            }
        }
        i += 1;
    }
    peaks
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn plateau_reports_its_middle() {
        let signal = [0, 5, 9, 9, 9, 2, 0];
        assert_eq!(find_peaks(&signal, 0), vec![3]);
    }

    #[test]
    fn edges_are_not_peaks() {
        let signal = [9, 1, 1, 9];
        assert!(find_peaks(&signal, 0).is_empty());
    }

    #[test]
    fn plateau_running_into_the_edge_is_not_a_peak() {
        let signal = [0, 9, 9, 9];
        assert!(find_peaks(&signal, 0).is_empty());
    }

    #[test]
    fn height_filter_is_inclusive() {
        let signal = [0, 100, 0, 99, 0];
        assert_eq!(find_peaks(&signal, 100), vec![1]);
    }

    #[test]
    fn eight_bit_data_scales_by_257() {
        assert_eq!(rescale_factor(200), Some(257.0));
        assert_eq!(rescale_factor(40_000), None);
        assert_eq!(rescale_factor(0), None);
    }

    #[test]
    fn isolate_then_restore_keeps_rescaled_plane() {
        let mut plane = array![[0u16, 250, 0], [0, 10, 0]];
        let isolated = HotPixelIsolator::default().isolate(&mut plane);
        assert_eq!(isolated.len(), 1);
        assert_eq!(plane[[0, 1]], u16::MAX);
        isolated.restore(&mut plane);
        assert_eq!(plane[[0, 1]], 250 * 257);
        assert_eq!(plane[[1, 1]], 10 * 257);
    }
}
