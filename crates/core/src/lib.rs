//! Posecraft domain core.
//!
//! Pure domain logic for compositing a reference pose into a background
//! scene: pose/scene configuration, scene alignment, pixel-level issue
//! detection, correction scoring, and quality metric aggregation.
//! Nothing in this crate performs network or database I/O; remote
//! collaborators are described by the traits in [`alignment`] and
//! [`issues`].

pub mod alignment;
pub mod correction;
pub mod error;
pub mod issues;
pub mod mask;
pub mod metrics;
pub mod pose;
pub mod project;
pub mod prompt;
pub mod scene;
pub mod status;
pub mod style;
pub mod types;
pub mod zones;
