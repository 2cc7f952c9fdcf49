//! Band reflectance of a plane-parallel atmosphere with embedded aerosol or
//! cloud layers, using a two-stream solution per layer and the adding method
//! to combine layers.
//!
//! The solver is generic over [`Scalar`], so the same code computes plain
//! reflectances (`f64`) and reflectances that carry derivatives
//! ([`num_dual::Dual64`]). See [`reflectance`] and [`true_reflectance`] for
//! the entry points, and [`reflectance_jacobian`] for sensitivities.
//!
//! With the `python` feature, the crate also builds a Python extension
//! module. The Python interface lives in its own module and is the only
//! place that uses `pyo3`.

pub mod error;
pub mod rtm;

#[cfg(feature = "python")]
mod python;

pub use error::RtmError;
pub use rtm::{
    add_layer_above, combine_layers, reflectance, reflectance_bands, reflectance_jacobian,
    semi_infinite_reflectance, solve_layer, true_reflectance, ActiveInput, AddingStep,
    BandCase, BandProfile, ColumnOperator, Geometry, LayerOperator, MergedLayerProperty,
    Particulates, PhaseScaling, Scalar, SolverSettings, SurfaceAlbedo, WorkingData,
};
