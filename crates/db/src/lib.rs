//! Database layer for the psyst matchmaking tool.
//!
//! Provides SQLite storage for the interpolated results database, plus
//! read access to the COMPAS and MESA input databases.

pub mod models;
pub mod pool;

pub use pool::DbPool;
