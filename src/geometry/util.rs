//! Geometric helpers shared by the kernel and the classification stages.

pub mod circumsphere;
pub mod hilbert;
pub mod measures;
pub mod point_generation;

pub use circumsphere::*;
pub use measures::*;
