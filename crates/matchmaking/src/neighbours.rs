//! Neighbour-finding over the regular MESA grid.

use crate::grid::{BinaryPoint, Grid, MatchError, Neighbour, AXES};

/// Floor for weight factors when a point sits exactly on a grid value.
const NZERO: f64 = 1e-15;

/// Index of the axis value closest to `value`.
fn closest_index(axis: &[f64], value: f64) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (i, g) in axis.iter().enumerate() {
        let dist = (g - value).abs();
        if dist < best_dist {
            best_dist = dist;
            best = i;
        }
    }
    best
}

/// Find the single nearest grid point, one axis at a time, with weight 1.
///
/// Point and grid must already live in the same (log or linear) space.
pub fn nearest_neighbour(point: &BinaryPoint, grid: &Grid) -> Vec<Neighbour> {
    let values = point.values();
    let mut nearest = [0.0; 4];
    for (k, axis) in grid.axes().iter().enumerate() {
        nearest[k] = axis[closest_index(axis, values[k])];
    }

    vec![Neighbour {
        point: BinaryPoint::from_values(nearest),
        weight: 1.0,
    }]
}

/// Find the 2^4 = 16 corners of the grid cell enclosing `point`, weighted
/// by inverse distance.
///
/// Per corner the raw weight is the reciprocal of the product over axes of
/// `|value - corner| / cell_width`; the returned weights are normalised so
/// they sum to 1. Points on or beyond a grid edge are clamped into the
/// outermost cell.
pub fn weighted_neighbours(
    point: &BinaryPoint,
    grid: &Grid,
) -> Result<Vec<Neighbour>, MatchError> {
    let values = point.values();
    let axes = grid.axes();

    // lower corner of the enclosing cell, per axis
    let mut lower = [0usize; 4];
    for (k, axis) in axes.iter().enumerate() {
        if axis.len() < 2 {
            return Err(MatchError::AxisTooShort {
                axis: AXES[k],
                len: axis.len(),
            });
        }
        let mut idx = closest_index(axis, values[k]);
        if values[k] < axis[idx] && idx > 0 {
            idx -= 1;
        }
        lower[k] = idx.min(axis.len() - 2);
    }

    let mut corners = Vec::with_capacity(16);
    let mut raw_weights = Vec::with_capacity(16);
    for mask in 0..(1usize << 4) {
        let mut corner = [0.0; 4];
        let mut fraction = 1.0;
        for k in 0..4 {
            let axis = axes[k];
            let offset = (mask >> k) & 1;
            let grid_value = axis[lower[k] + offset];
            corner[k] = grid_value;

            let num = (values[k] - grid_value).abs();
            let den = axis[lower[k] + 1] - axis[lower[k]];
            let ratio = num / den;

            if (ratio - 1.0).abs() < NZERO {
                // the point sits on the opposite face of the cell
            } else if num < NZERO {
                fraction *= NZERO;
            } else {
                fraction *= ratio;
            }
        }
        corners.push(corner);
        raw_weights.push(1.0 / fraction);
    }

    let total: f64 = raw_weights.iter().sum();
    Ok(corners
        .into_iter()
        .zip(raw_weights)
        .map(|(corner, weight)| Neighbour {
            point: BinaryPoint::from_values(corner),
            weight: weight / total,
        })
        .collect())
}
