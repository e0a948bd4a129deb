//! Low-level pixel and geometry operations shared by the pipeline stages.

pub mod geometry;
pub mod morphology;

pub use geometry::BoundingBox;
