//! Matchmaking algorithms between a COMPAS population and a MESA grid.
//!
//! The match space is four dimensional: initial primary mass `m1i`, initial
//! secondary mass `m2i`, initial orbital period `porbi` and initial
//! eccentricity `ei`. The mass and period axes are compared in log10 space.

pub mod grid;
pub mod matcher;
pub mod neighbours;

pub use grid::{BinaryPoint, Grid, MatchError, Neighbour};
pub use matcher::{InterpolationMethod, MatchMaker};
