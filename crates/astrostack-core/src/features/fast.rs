//! FAST-9 segment-test corner detection.

use ndarray::Array2;
use rayon::prelude::*;

use crate::consts::PARALLEL_PIXEL_THRESHOLD;

/// Bresenham circle of radius 3 as `(dx, dy)`, clockwise from the top.
pub const CIRCLE: [(isize, isize); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

/// Contiguous arc length required for a corner.
pub const ARC_LENGTH: usize = 9;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Corner {
    pub x: usize,
    pub y: usize,
    pub score: f32,
}

/// Detect FAST-9 corners at least `border` pixels from every edge, with 3x3
/// non-maximum suppression on the corner score.
pub fn detect(image: &Array2<f32>, threshold: f32, border: usize) -> Vec<Corner> {
    let (h, w) = image.dim();
    let border = border.max(3);
    if h <= 2 * border || w <= 2 * border {
        return Vec::new();
    }

    let scan_row = |y: usize| -> Vec<Corner> {
        (border..w - border)
            .filter_map(|x| corner_score(image, x, y, threshold).map(|score| Corner { x, y, score }))
            .collect()
    };

    let rows = border..h - border;
    let candidates: Vec<Corner> = if h * w >= PARALLEL_PIXEL_THRESHOLD {
        rows.into_par_iter().flat_map_iter(scan_row).collect()
    } else {
        rows.flat_map(scan_row).collect()
    };

    suppress_non_maxima(&candidates, h, w)
}

/// Segment-test score, or `None` if `(x, y)` is not a corner.
///
/// The score is the summed excess contrast of the circle pixels over the
/// threshold, on the side (brighter or darker) that forms the arc.
pub fn corner_score(image: &Array2<f32>, x: usize, y: usize, threshold: f32) -> Option<f32> {
    let center = image[[y, x]];
    let ring: [f32; 16] = std::array::from_fn(|i| {
        let (dx, dy) = CIRCLE[i];
        image[[(y as isize + dy) as usize, (x as isize + dx) as usize]]
    });

    // Quick reject on the four compass points: an arc of 9 covers at least
    // two of them.
    let compass = [ring[0], ring[4], ring[8], ring[12]];
    let brighter = compass.iter().filter(|&&p| p > center + threshold).count();
    let darker = compass.iter().filter(|&&p| p < center - threshold).count();
    if brighter < 2 && darker < 2 {
        return None;
    }

    let bright_arc = has_arc(&ring, |p| p > center + threshold);
    let dark_arc = has_arc(&ring, |p| p < center - threshold);
    if !bright_arc && !dark_arc {
        return None;
    }

    let score = ring
        .iter()
        .map(|&p| {
            let diff = if bright_arc { p - center } else { center - p };
            (diff - threshold).max(0.0)
        })
        .sum();
    Some(score)
}

fn has_arc(ring: &[f32; 16], test: impl Fn(f32) -> bool) -> bool {
    let mut run = 0;
    for i in 0..ring.len() + ARC_LENGTH - 1 {
        if test(ring[i % 16]) {
            run += 1;
            if run >= ARC_LENGTH {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

/// Keep corners whose score is the 3x3 maximum. Ties go to the corner that
/// comes first in raster order.
fn suppress_non_maxima(corners: &[Corner], h: usize, w: usize) -> Vec<Corner> {
    let mut scores = Array2::<f32>::zeros((h, w));
    for c in corners {
        scores[[c.y, c.x]] = c.score;
    }

    corners
        .iter()
        .filter(|c| {
            for dy in -1isize..=1 {
                for dx in -1isize..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let ny = (c.y as isize + dy) as usize;
                    let nx = (c.x as isize + dx) as usize;
                    let other = scores[[ny, nx]];
                    let earlier = dy < 0 || (dy == 0 && dx < 0);
                    if other > c.score || (earlier && other == c.score) {
                        return false;
                    }
                }
            }
            true
        })
        .copied()
        .collect()
}
