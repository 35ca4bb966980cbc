//! Stream utilities for batch consumers

mod coalesce;

pub use coalesce::{Coalesce, CoalesceExt};
