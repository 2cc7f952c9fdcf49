//! Two-stream/adding reflectance model for a plane-parallel column
//!
//! The solve runs in three stages:
//!
//! 1. merge the gas and particulate optical properties of each layer
//! 2. compute each layer's two-stream response
//! 3. fold the layer responses onto the surface, from the bottom up
//!
//! Everything is generic over [`Scalar`], so the same code runs with plain
//! `f64` values or with dual numbers that carry derivatives.

mod adding;
mod band;
mod merge;
mod scalar;
mod sensitivity;
mod two_stream;
mod working_data;


use log::{debug, trace};
use ndarray::ArrayView2;

pub use self::adding::{add_layer_above, combine_layers, ColumnOperator, SurfaceAlbedo};
pub use self::band::{BandProfile, Geometry};
pub use self::merge::{MergedLayerProperty, Particulates};
pub use self::scalar::Scalar;
pub use self::sensitivity::{reflectance_bands, reflectance_jacobian, ActiveInput, BandCase};
pub use self::two_stream::{semi_infinite_reflectance, solve_layer, LayerOperator};
pub use self::working_data::{AddingStep, WorkingData};

use self::merge::merge_layers;
use self::working_data::SolveRecord;
use crate::error::RtmError;

/// How the forward peak of the phase function is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PhaseScaling {
    /// Use the asymmetry factor as is (Eddington-type).
    None,
    /// Delta scaling with the second Legendre moment as the forward-peak
    /// fraction (delta-Eddington-type).
    #[default]
    Delta,
}

/// Solver settings that are constant across calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverSettings {
    /// Phase function scaling.
    pub scaling: PhaseScaling,
    /// Layers with `1 - ssa` at or below this value use the form of the
    /// closed solution that stays regular as the diffusion exponent k → 0.
    pub conservative_threshold: f64,
    /// Direct-beam terms are singular where `1 - (k μ0)²` vanishes. Below
    /// this magnitude they are evaluated on either side of the singularity.
    pub resonance_tolerance: f64,
    /// Relative shift of μ0 used on either side of the singularity.
    pub resonance_shift: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            scaling: PhaseScaling::Delta,
            conservative_threshold: 1e-10,
            resonance_tolerance: 1e-6,
            resonance_shift: 1e-3,
        }
    }
}

/// Compute the reflectance of the column described by `band`, with the
/// given surface `albedo` and embedded `particulates`.
///
/// `albedo` has either one entry (used for diffuse and direct illumination)
/// or two (`[diffuse, direct]`).
///
/// If `working_data` is given, the intermediate state of the solve is
/// appended to it, but only if the solve succeeds.
pub fn reflectance<T: Scalar>(
    band: &BandProfile,
    settings: &SolverSettings,
    albedo: &[T],
    particulates: &Particulates<'_, T>,
    working_data: Option<&mut WorkingData<T>>,
) -> Result<T, RtmError> {
    let num_layers = band.num_layers();
    let albedo = SurfaceAlbedo::from_slice(albedo)?;
    particulates.validate(num_layers)?;
    debug!(
        "inputs are consistent: {num_layers} layers, {} particulate constituents",
        particulates.len()
    );

    let merged = merge_layers(band, particulates);
    let surface = ColumnOperator::surface(&albedo);
    let mu_sun = band.mu_sun();

    // Only allocate for the record if someone wants it
    let mut steps = working_data
        .as_ref()
        .map(|_| Vec::with_capacity(num_layers));

    let column = (0..num_layers)
        .rev()
        .try_fold(surface, |column, layer| -> Result<_, RtmError> {
            let layer_operator = solve_layer(&merged[layer], mu_sun, settings, layer)?;
            let column = add_layer_above(&column, &layer_operator);
            trace!("layer {layer}: {layer_operator:?}");

            if let Some(steps) = steps.as_mut() {
                steps.push(AddingStep {
                    layer,
                    layer_operator,
                    column,
                });
            }
            Ok(column)
        })?;

    let diffuse_fraction = band.diffuse_fraction();
    let result = T::from_f64(band.flux_normalization())
        * (T::from_f64(1.0 - diffuse_fraction) * column.reflectance_direct
            + T::from_f64(diffuse_fraction) * column.reflectance_diffuse);

    if let (Some(working_data), Some(steps)) = (working_data, steps) {
        working_data.commit(SolveRecord {
            merged,
            surface,
            steps,
        });
    }

    Ok(result)
}

/// Status-code form of [`reflectance`] with default [`SolverSettings`].
///
/// `loc`, `od_particulate`, `ssa_particulate` and `pf_particulate` are
/// parallel arrays with one entry per constituent, and `pfc_particulate` has
/// one row per constituent.
///
/// Returns 0 on success, after writing `reflectance`. Otherwise returns the
/// nonzero [`RtmError::status`] and leaves `reflectance` and `working_data`
/// untouched.
#[allow(clippy::too_many_arguments)]
pub fn true_reflectance<'a, T: Scalar>(
    band: &BandProfile,
    albedo: &[T],
    loc_particulate: &'a [usize],
    od_particulate: &'a [T],
    ssa_particulate: &'a [T],
    pf_particulate: &'a [T],
    pfc_particulate: ArrayView2<'a, T>,
    reflectance: &mut T,
    working_data: Option<&mut WorkingData<T>>,
) -> i32 {
    let particulates = Particulates::new(
        loc_particulate,
        od_particulate,
        ssa_particulate,
        pf_particulate,
        pfc_particulate,
    );

    match self::reflectance(
        band,
        &SolverSettings::default(),
        albedo,
        &particulates,
        working_data,
    ) {
        Ok(value) => {
            *reflectance = value;
            0
        }
        Err(e) => {
            debug!("reflectance failed: {e}");
            e.status()
        }
    }
}
