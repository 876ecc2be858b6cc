use crate::experiment::ScanPoint;

use super::error::PiezoError;

/// Snake traversal of an `n × n` grid of side `length` anchored at `start`.
///
/// The first row visited is the top one (`j = n − 1`) from left to right;
/// every following row goes one down and reverses direction. With a mask,
/// only cells whose `mask[j][i]` is true are emitted, in the same order.
pub fn snake_coords(
    start: (f64, f64),
    length: f64,
    n: usize,
    mask: Option<&[Vec<bool>]>,
) -> Result<Vec<ScanPoint>, PiezoError> {
    if n == 0 {
        return Err(PiezoError::InvalidParameters(
            "scan needs at least one point per row".to_string(),
        ));
    }
    if !(length >= 0.0) || !length.is_finite() {
        return Err(PiezoError::InvalidParameters(format!(
            "scan length must be non-negative, got {}",
            length
        )));
    }
    if let Some(mask) = mask {
        if mask.len() != n || mask.iter().any(|row| row.len() != n) {
            return Err(PiezoError::InvalidParameters(format!(
                "mask must be {}x{}",
                n, n
            )));
        }
    }

    let step = if n > 1 { length / (n - 1) as f64 } else { 0.0 };
    let mut points = Vec::with_capacity(n * n);
    for (row, j) in (0..n).rev().enumerate() {
        let columns: Box<dyn Iterator<Item = usize>> = if row % 2 == 0 {
            Box::new(0..n)
        } else {
            Box::new((0..n).rev())
        };
        for i in columns {
            if mask.map_or(true, |m| m[j][i]) {
                points.push(ScanPoint {
                    i,
                    j,
                    x: start.0 + i as f64 * step,
                    y: start.1 + j as f64 * step,
                });
            }
        }
    }
    Ok(points)
}

/// Scan origin and side length covering `corners`.
///
/// The origin is the lowest X and lowest Y among the corners; the side is
/// the larger of the two extents.
pub fn scan_bounds(corners: &[(f64, f64)]) -> Result<((f64, f64), f64), PiezoError> {
    if corners.len() < 2 {
        return Err(PiezoError::InvalidParameters(
            "at least two corners are needed".to_string(),
        ));
    }
    let (mut x_min, mut y_min) = (f64::INFINITY, f64::INFINITY);
    let (mut x_max, mut y_max) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for &(x, y) in corners {
        x_min = x_min.min(x);
        x_max = x_max.max(x);
        y_min = y_min.min(y);
        y_max = y_max.max(y);
    }
    Ok(((x_min, y_min), (x_max - x_min).max(y_max - y_min)))
}
