//! Matcher that applies the configured interpolation method to one binary.

use crate::grid::{BinaryPoint, Grid, MatchError, Neighbour};
use crate::neighbours::{nearest_neighbour, weighted_neighbours};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::debug;

/// How grid neighbours of a binary are selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InterpolationMethod {
    /// Single closest grid point, weight 1.
    #[default]
    NearestNeighbour,
    /// All 16 corners of the enclosing grid cell, inverse-distance weighted.
    WeightedNeighbours,
}

impl InterpolationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterpolationMethod::NearestNeighbour => "nearest_neighbour",
            InterpolationMethod::WeightedNeighbours => "weighted_neighbours",
        }
    }
}

impl FromStr for InterpolationMethod {
    type Err = MatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "nearest_neighbour" => Ok(InterpolationMethod::NearestNeighbour),
            "weighted_neighbours" => Ok(InterpolationMethod::WeightedNeighbours),
            other => Err(MatchError::UnknownMethod(other.to_string())),
        }
    }
}

/// Matchmaker between COMPAS binaries and the MESA grid.
///
/// Holds the grid in log space; binaries are converted on the way in and
/// neighbours are converted back to linear space on the way out, so callers
/// can resolve them directly against the MESA database.
pub struct MatchMaker {
    grid: Grid,
    method: InterpolationMethod,
}

impl MatchMaker {
    /// Create a matchmaker for a validated grid and interpolation method.
    pub fn new(grid: Grid, method: InterpolationMethod) -> Result<Self, MatchError> {
        grid.validate()?;
        let grid = grid.to_log()?;
        Ok(Self { grid, method })
    }

    pub fn method(&self) -> InterpolationMethod {
        self.method
    }

    /// Locate the grid neighbours of one binary.
    ///
    /// Returned neighbour points are in linear space and their weights sum
    /// to 1 for either method.
    pub fn match_binary(&self, binary: &BinaryPoint) -> Result<Vec<Neighbour>, MatchError> {
        let logged = binary.to_log()?;

        let neighbours = match self.method {
            InterpolationMethod::NearestNeighbour => nearest_neighbour(&logged, &self.grid),
            InterpolationMethod::WeightedNeighbours => weighted_neighbours(&logged, &self.grid)?,
        };

        let neighbours: Vec<Neighbour> = neighbours
            .into_iter()
            .map(|n| Neighbour {
                point: n.point.to_linear(),
                weight: n.weight,
            })
            .collect();

        if let Some(closest) = neighbours
            .iter()
            .max_by(|a, b| a.weight.partial_cmp(&b.weight).unwrap_or(std::cmp::Ordering::Equal))
        {
            debug!(
                "closest point to ({:.2}, {:.2}, {:.2}, {:.2}) is ({:.2}, {:.2}, {:.2}, {:.2})",
                binary.m1i,
                binary.m2i,
                binary.porbi,
                binary.ei,
                closest.point.m1i,
                closest.point.m2i,
                closest.point.porbi,
                closest.point.ei,
            );
        }

        Ok(neighbours)
    }
}
