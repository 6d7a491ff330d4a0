//! The regular MESA grid and the points matched against it.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Axis names of the match space, in storage order.
pub const AXES: [&str; 4] = ["m1i", "m2i", "porbi", "ei"];

/// Which axes are compared in log10 space. Eccentricity stays linear.
const LOG_AXIS: [bool; 4] = [true, true, true, false];

/// Error type for grid handling and matchmaking.
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("grid axis `{0}` is empty")]
    EmptyAxis(&'static str),
    #[error("grid axis `{axis}` has {len} point(s), weighted matching needs at least 2")]
    AxisTooShort { axis: &'static str, len: usize },
    #[error("grid axis `{0}` is not strictly ascending")]
    UnsortedAxis(&'static str),
    #[error("non-positive value {value} on log axis `{axis}`")]
    NonPositiveLogValue { axis: &'static str, value: f64 },
    #[error("non-finite value {value} on axis `{axis}`")]
    NonFiniteValue { axis: &'static str, value: f64 },
    #[error("failed to read grid file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse grid file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("unknown interpolation method `{0}`")]
    UnknownMethod(String),
}

/// A point in the four-dimensional match space.
///
/// COMPAS binaries are mapped into this space with
/// `(companion_mass, remnant_mass, porb_pm, e_pm)` taking the roles of
/// `(m1i, m2i, porbi, ei)`: the companion of the COMPAS supernova is the
/// donor star of the matched MESA model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BinaryPoint {
    pub m1i: f64,
    pub m2i: f64,
    pub porbi: f64,
    pub ei: f64,
}

impl BinaryPoint {
    pub fn values(&self) -> [f64; 4] {
        [self.m1i, self.m2i, self.porbi, self.ei]
    }

    pub fn from_values(v: [f64; 4]) -> Self {
        Self {
            m1i: v[0],
            m2i: v[1],
            porbi: v[2],
            ei: v[3],
        }
    }

    /// Convert the log-scaled axes to log10 space.
    pub fn to_log(&self) -> Result<Self, MatchError> {
        let mut v = self.values();
        for k in 0..4 {
            if !v[k].is_finite() {
                return Err(MatchError::NonFiniteValue {
                    axis: AXES[k],
                    value: v[k],
                });
            }
            if LOG_AXIS[k] {
                if v[k] <= 0.0 {
                    return Err(MatchError::NonPositiveLogValue {
                        axis: AXES[k],
                        value: v[k],
                    });
                }
                v[k] = v[k].log10();
            }
        }
        Ok(Self::from_values(v))
    }

    /// Convert the log-scaled axes back to linear space.
    pub fn to_linear(&self) -> Self {
        let mut v = self.values();
        for k in 0..4 {
            if LOG_AXIS[k] {
                v[k] = 10f64.powf(v[k]);
            }
        }
        Self::from_values(v)
    }
}

/// A located grid point together with its interpolation weight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Neighbour {
    pub point: BinaryPoint,
    pub weight: f64,
}

/// The regular grid of MESA initial conditions, one ascending axis per
/// match-space dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    pub m1i: Vec<f64>,
    pub m2i: Vec<f64>,
    pub porbi: Vec<f64>,
    pub ei: Vec<f64>,
}

#[derive(Deserialize)]
struct GridFile {
    axes: Grid,
}

impl Grid {
    /// Load a grid from a TOML file with an `[axes]` table holding one
    /// array per axis.
    pub fn load(path: &Path) -> Result<Self, MatchError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Parse a grid from TOML text and validate it.
    pub fn from_toml_str(text: &str) -> Result<Self, MatchError> {
        let file: GridFile = toml::from_str(text)?;
        file.axes.validate()?;
        Ok(file.axes)
    }

    pub fn axes(&self) -> [&[f64]; 4] {
        [&self.m1i, &self.m2i, &self.porbi, &self.ei]
    }

    /// Check that every axis is non-empty, finite and strictly ascending.
    pub fn validate(&self) -> Result<(), MatchError> {
        for (k, axis) in self.axes().iter().enumerate() {
            if axis.is_empty() {
                return Err(MatchError::EmptyAxis(AXES[k]));
            }
            for &value in axis.iter() {
                if !value.is_finite() {
                    return Err(MatchError::NonFiniteValue {
                        axis: AXES[k],
                        value,
                    });
                }
            }
            if axis.windows(2).any(|w| w[0] >= w[1]) {
                return Err(MatchError::UnsortedAxis(AXES[k]));
            }
        }
        Ok(())
    }

    /// Convert the log-scaled axes to log10 space.
    pub fn to_log(&self) -> Result<Self, MatchError> {
        let mut axes: [Vec<f64>; 4] = [
            self.m1i.clone(),
            self.m2i.clone(),
            self.porbi.clone(),
            self.ei.clone(),
        ];
        for (k, axis) in axes.iter_mut().enumerate() {
            if !LOG_AXIS[k] {
                continue;
            }
            for value in axis.iter_mut() {
                if *value <= 0.0 {
                    return Err(MatchError::NonPositiveLogValue {
                        axis: AXES[k],
                        value: *value,
                    });
                }
                *value = value.log10();
            }
        }
        let [m1i, m2i, porbi, ei] = axes;
        Ok(Self {
            m1i,
            m2i,
            porbi,
            ei,
        })
    }
}
