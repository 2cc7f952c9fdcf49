//! Two-stream reflectance and transmittance of a homogeneous layer.
//!
//! This is the closed-form solution of Meador and Weaver (1980) using the
//! coefficients of Zdunkowski's practical improved flux method:
//!
//! - γ1 = (8 − ω(5 + 3g)) / 4
//! - γ2 = 3ω(1 − g) / 4
//! - γ3 = (2 − 3gμ0) / 4
//! - γ4 = 1 − γ3
//!
//! With these, a purely absorbing layer reflects nothing and transmits
//! diffuse flux as exp(−2τ), and the direct beam as exp(−τ/μ0).
//!
//! Fluxes are normalized so that the collimated flux entering the top of the
//! layer through a horizontal surface is 1.
//!
//! # References
//!
//! W. E. Meador and W. R. Weaver, "Two-stream approximations to radiative
//! transfer in planetary atmospheres: a unified description of existing
//! methods and a new improvement", J. Atmos. Sci., vol. 37, pp. 630-643,
//! 1980.

use log::debug;

use super::merge::MergedLayerProperty;
use super::scalar::Scalar;
use super::{PhaseScaling, SolverSettings};
use crate::error::RtmError;

/// Smallest admissible `1 - f` for delta scaling.
const MIN_UNSCALED_FRACTION: f64 = 1e-12;

/// Below this value of (kτ)², cosh and sinh are summed as series.
const SERIES_LIMIT: f64 = 1e-2;

/// Local response of one layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerOperator<T> {
    /// Reflectance for diffuse illumination.
    pub reflectance_diffuse: T,
    /// Transmittance for diffuse illumination.
    pub transmittance_diffuse: T,
    /// Diffuse reflectance for the direct beam.
    pub reflectance_direct: T,
    /// Part of the direct beam leaving the bottom as diffuse flux.
    pub transmittance_direct_diffuse: T,
    /// Part of the direct beam leaving the bottom unscattered.
    pub transmittance_direct: T,
}

impl<T: Scalar> LayerOperator<T> {
    /// Response of an empty layer.
    pub fn identity() -> Self {
        let zero = T::from_f64(0.0);
        let one = T::from_f64(1.0);
        Self {
            reflectance_diffuse: zero,
            transmittance_diffuse: one,
            reflectance_direct: zero,
            transmittance_direct_diffuse: zero,
            transmittance_direct: one,
        }
    }

    fn is_finite(&self) -> bool {
        [
            self.reflectance_diffuse,
            self.transmittance_diffuse,
            self.reflectance_direct,
            self.transmittance_direct_diffuse,
            self.transmittance_direct,
        ]
        .iter()
        .all(|x| x.value().is_finite())
    }
}

/// Layer properties after optional delta scaling.
struct Scaled<T> {
    od: T,
    ssa: T,
    asymmetry: T,
}

/// Apply the phase-function scaling. Returns `None` when the forward-peak
/// fraction leaves nothing to scale.
fn scale<T: Scalar>(
    layer: &MergedLayerProperty<T>,
    settings: &SolverSettings,
) -> Option<Scaled<T>> {
    match settings.scaling {
        PhaseScaling::None => Some(Scaled {
            od: layer.od,
            ssa: layer.ssa,
            asymmetry: layer.asymmetry,
        }),
        PhaseScaling::Delta => {
            let f = layer.forward_fraction();
            if 1.0 - f.value() <= MIN_UNSCALED_FRACTION {
                return None;
            }
            let one = T::from_f64(1.0);
            let one_minus_f = one - f;
            let one_minus_ssa_f = one - layer.ssa * f;
            Some(Scaled {
                od: layer.od * one_minus_ssa_f,
                ssa: layer.ssa * one_minus_f * one_minus_ssa_f.recip(),
                asymmetry: (layer.asymmetry - f) * one_minus_f.recip(),
            })
        }
    }
}

/// γ1 and γ2, which don't depend on the direction of the beam.
fn diffuse_gammas<T: Scalar>(ssa: T, asymmetry: T) -> (T, T) {
    let quarter = T::from_f64(0.25);
    let gamma1 =
        (T::from_f64(8.0) - ssa * (T::from_f64(5.0) + T::from_f64(3.0) * asymmetry)) * quarter;
    let gamma2 = T::from_f64(3.0) * ssa * (T::from_f64(1.0) - asymmetry) * quarter;
    (gamma1, gamma2)
}

/// γ3 and γ4 for a beam with zenith cosine `mu`.
fn direct_gammas<T: Scalar>(asymmetry: T, mu: f64) -> (T, T) {
    let gamma3 = (T::from_f64(2.0) - T::from_f64(3.0 * mu) * asymmetry) * T::from_f64(0.25);
    (gamma3, T::from_f64(1.0) - gamma3)
}

/// Diffuse part of the non-conservative solution, kept so the direct-beam
/// terms can be evaluated for more than one beam cosine.
struct DiffuseSolution<T> {
    od: T,
    ssa: T,
    asymmetry: T,
    gamma1: T,
    gamma2: T,
    k: T,
    exponential: T,
    exponential2: T,
    /// 1 / (k + γ1 + (k − γ1) exp(−2kτ))
    factor: T,
}

impl<T: Scalar> DiffuseSolution<T> {
    fn new(scaled: &Scaled<T>) -> Self {
        let (gamma1, gamma2) = diffuse_gammas(scaled.ssa, scaled.asymmetry);
        let k = ((gamma1 - gamma2) * (gamma1 + gamma2)).sqrt();
        let exponential = (-k * scaled.od).exp();
        let exponential2 = exponential * exponential;
        let factor = (k + gamma1 + (k - gamma1) * exponential2).recip();
        Self {
            od: scaled.od,
            ssa: scaled.ssa,
            asymmetry: scaled.asymmetry,
            gamma1,
            gamma2,
            k,
            exponential,
            exponential2,
            factor,
        }
    }

    fn reflectance(&self) -> T {
        self.gamma2 * (T::from_f64(1.0) - self.exponential2) * self.factor
    }

    fn transmittance(&self) -> T {
        T::from_f64(2.0) * self.k * self.exponential * self.factor
    }

    /// Diffuse reflectance and diffuse transmittance of a direct beam with
    /// zenith cosine `mu`. Singular where kμ = 1.
    fn direct(&self, mu: f64) -> (T, T) {
        let one = T::from_f64(1.0);
        let two = T::from_f64(2.0);
        let Self {
            od,
            ssa,
            gamma1,
            gamma2,
            k,
            exponential,
            exponential2,
            factor,
            ..
        } = *self;

        let (gamma3, gamma4) = direct_gammas(self.asymmetry, mu);
        let trans_dir = (-od * T::from_f64(1.0 / mu)).exp();
        let k_mu = k * T::from_f64(mu);
        let k_gamma3 = k * gamma3;
        let k_gamma4 = k * gamma4;
        let alpha1 = gamma1 * gamma4 + gamma2 * gamma3;
        let alpha2 = gamma1 * gamma3 + gamma2 * gamma4;
        let scale = ssa * factor * (one - k_mu * k_mu).recip();

        let reflectance = scale
            * ((one - k_mu) * (alpha2 + k_gamma3)
                - (one + k_mu) * (alpha2 - k_gamma3) * exponential2
                - two * (k_gamma3 - alpha2 * k_mu) * exponential * trans_dir);
        let transmittance = scale
            * (two * k * (gamma4 + alpha1 * T::from_f64(mu)) * exponential
                - trans_dir
                    * ((one + k_mu) * (alpha1 + k_gamma4)
                        - (one - k_mu) * (alpha1 - k_gamma4) * exponential2));
        (reflectance, transmittance)
    }
}

/// cosh(kτ) and sinh(kτ)/k, both multiplied by m = exp(−kτ), and m itself.
///
/// Only k² enters, so the result and its derivatives stay regular as k → 0.
fn hyperbolic<T: Scalar>(k2: T, od: T) -> (T, T, T) {
    let one = T::from_f64(1.0);
    let x = k2 * od * od;
    if x.value() < SERIES_LIMIT {
        let series = |coefficients: [f64; 4]| {
            coefficients
                .iter()
                .rev()
                .fold(T::from_f64(0.0), |sum, &a| x * (T::from_f64(a) + sum))
        };
        let c = one + series([1.0 / 2.0, 1.0 / 24.0, 1.0 / 720.0, 1.0 / 40320.0]);
        let s = od * (one + series([1.0 / 6.0, 1.0 / 120.0, 1.0 / 5040.0, 1.0 / 362880.0]));
        (c, s, one)
    } else {
        let half = T::from_f64(0.5);
        let r = x.sqrt();
        let m = (-r).exp();
        let m2 = m * m;
        (half * (one + m2), half * od * (one - m2) * r.recip(), m)
    }
}

/// Response of a layer with (nearly) conservative scattering.
///
/// This is the general closed form rewritten in terms of cosh and sinh, so
/// that it depends on k only through k². It reduces to R = γ1τ/(1 + γ1τ)
/// when ω = 1, while derivatives with respect to ω keep their dependence
/// on γ2 and k².
fn conservative_operator<T: Scalar>(
    scaled: &Scaled<T>,
    mu_sun: f64,
    trans_dir: T,
) -> LayerOperator<T> {
    let one = T::from_f64(1.0);
    let mu = T::from_f64(mu_sun);
    let (gamma1, gamma2) = diffuse_gammas(scaled.ssa, scaled.asymmetry);
    let (gamma3, gamma4) = direct_gammas(scaled.asymmetry, mu_sun);
    let k2 = (gamma1 - gamma2) * (gamma1 + gamma2);
    let alpha1 = gamma1 * gamma4 + gamma2 * gamma3;
    let alpha2 = gamma1 * gamma3 + gamma2 * gamma4;
    let (c, s, m) = hyperbolic(k2, scaled.od);

    let factor = (c + gamma1 * s).recip();
    let beam = scaled.ssa * factor * (one - k2 * mu * mu).recip();
    let reflectance_direct = beam
        * ((alpha2 - k2 * mu * gamma3) * s + (gamma3 - mu * alpha2) * (c - trans_dir * m));
    let transmittance_direct_diffuse = beam
        * ((gamma4 + mu * alpha1) * (m - trans_dir * c)
            - trans_dir * (alpha1 + k2 * mu * gamma4) * s);

    LayerOperator {
        reflectance_diffuse: gamma2 * s * factor,
        transmittance_diffuse: m * factor,
        reflectance_direct,
        transmittance_direct_diffuse,
        transmittance_direct: trans_dir,
    }
}

/// Compute the two-stream response of layer `index` for a solar zenith
/// cosine `mu_sun`.
pub fn solve_layer<T: Scalar>(
    layer: &MergedLayerProperty<T>,
    mu_sun: f64,
    settings: &SolverSettings,
    index: usize,
) -> Result<LayerOperator<T>, RtmError> {
    if layer.od.value() == 0.0 {
        return Ok(LayerOperator::identity());
    }
    let degenerate = RtmError::NumericalDegeneracy { layer: index };
    let scaled = scale(layer, settings).ok_or_else(|| degenerate.clone())?;

    // γ3 outside [0, 1] makes the single-scattering source negative
    let (gamma3, _) = direct_gammas(scaled.asymmetry, mu_sun);
    if !(0.0..=1.0).contains(&gamma3.value()) {
        return Err(RtmError::OutOfRange {
            quantity: "effective asymmetry factor",
            index,
        });
    }

    let od = scaled.od;
    let trans_dir = (-od * T::from_f64(1.0 / mu_sun)).exp();

    let operator = if 1.0 - scaled.ssa.value() <= settings.conservative_threshold {
        conservative_operator(&scaled, mu_sun, trans_dir)
    } else {
        let solution = DiffuseSolution::new(&scaled);

        let k_mu = solution.k.value() * mu_sun;
        let (reflectance_direct, transmittance_direct_diffuse) =
            if (1.0 - k_mu * k_mu).abs() < settings.resonance_tolerance {
                // Average over beam cosines either side of the singularity
                debug!("layer {index}: k·μ0 = {k_mu}, averaging across the resonance");
                let half = T::from_f64(0.5);
                let (r_lo, t_lo) = solution.direct(mu_sun * (1.0 - settings.resonance_shift));
                let (r_hi, t_hi) = solution.direct(mu_sun * (1.0 + settings.resonance_shift));
                ((r_lo + r_hi) * half, (t_lo + t_hi) * half)
            } else {
                solution.direct(mu_sun)
            };

        LayerOperator {
            reflectance_diffuse: solution.reflectance(),
            transmittance_diffuse: solution.transmittance(),
            reflectance_direct,
            transmittance_direct_diffuse,
            transmittance_direct: trans_dir,
        }
    };

    if operator.is_finite() {
        Ok(operator)
    } else {
        Err(degenerate)
    }
}

/// Reflectance of a semi-infinite layer with the given single-scattering
/// properties, as `(diffuse, direct)`.
///
/// This is the limit of [`solve_layer`] for large optical depth, so it does
/// not depend on `layer.od`. Returns `None` if the phase function cannot be
/// scaled.
pub fn semi_infinite_reflectance<T: Scalar>(
    layer: &MergedLayerProperty<T>,
    mu_sun: f64,
    settings: &SolverSettings,
) -> Option<(T, T)> {
    let scaled = scale(layer, settings)?;
    let one = T::from_f64(1.0);
    if 1.0 - scaled.ssa.value() <= settings.conservative_threshold {
        return Some((one, one));
    }

    let (gamma1, gamma2) = diffuse_gammas(scaled.ssa, scaled.asymmetry);
    let (gamma3, gamma4) = direct_gammas(scaled.asymmetry, mu_sun);
    let k = ((gamma1 - gamma2) * (gamma1 + gamma2)).sqrt();
    let inv_k_gamma1 = (k + gamma1).recip();
    let alpha2 = gamma1 * gamma3 + gamma2 * gamma4;

    let diffuse = gamma2 * inv_k_gamma1;
    let direct = scaled.ssa
        * (alpha2 + k * gamma3)
        * inv_k_gamma1
        * (one + k * T::from_f64(mu_sun)).recip();
    Some((diffuse, direct))
}
