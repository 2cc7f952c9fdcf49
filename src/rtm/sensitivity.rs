//! Sensitivities of the reflectance, and batches of independent solves.

use log::info;
use ndarray::Array2;
use num_dual::Dual64;
use rayon::prelude::*;

use super::scalar::{constants, Scalar};
use super::{reflectance, BandProfile, Particulates, SolverSettings};
use crate::error::RtmError;

/// A scalar input that derivatives can be taken with respect to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActiveInput {
    /// Entry of the surface albedo array.
    Albedo(usize),
    /// Optical depth of a particulate constituent.
    Od(usize),
    /// Single-scattering albedo of a particulate constituent.
    Ssa(usize),
    /// Asymmetry factor of a particulate constituent.
    Asymmetry(usize),
    /// Entry of the phase function coefficient table.
    PhaseCoefficient {
        /// Row (constituent) of the table.
        constituent: usize,
        /// Column of the table.
        column: usize,
    },
}

/// Inputs promoted to constant duals, ready to have one of them seeded.
#[derive(Clone)]
struct DualInputs {
    albedo: Vec<Dual64>,
    od: Vec<Dual64>,
    ssa: Vec<Dual64>,
    pf: Vec<Dual64>,
    pfc: Array2<Dual64>,
}

impl DualInputs {
    fn new(albedo: &[f64], particulates: &Particulates<'_, f64>) -> Self {
        Self {
            albedo: constants(albedo),
            od: constants(particulates.od),
            ssa: constants(particulates.ssa),
            pf: constants(particulates.pf),
            pfc: particulates.pfc.mapv(<Dual64 as Scalar>::from_f64),
        }
    }

    /// Give `input` a unit derivative. Returns `false` if it doesn't exist.
    fn seed(&mut self, input: ActiveInput) -> bool {
        let target = match input {
            ActiveInput::Albedo(i) => self.albedo.get_mut(i),
            ActiveInput::Od(i) => self.od.get_mut(i),
            ActiveInput::Ssa(i) => self.ssa.get_mut(i),
            ActiveInput::Asymmetry(i) => self.pf.get_mut(i),
            ActiveInput::PhaseCoefficient {
                constituent,
                column,
            } => self.pfc.get_mut([constituent, column]),
        };
        match target {
            Some(x) => {
                x.eps = 1.0;
                true
            }
            None => false,
        }
    }
}

/// Reflectance together with its partial derivatives with respect to each
/// of the `active` inputs, in the same order.
///
/// Each derivative is an independent forward-mode pass with one seeded
/// [`Dual64`] input; the passes run in parallel.
pub fn reflectance_jacobian(
    band: &BandProfile,
    settings: &SolverSettings,
    albedo: &[f64],
    particulates: &Particulates<'_, f64>,
    active: &[ActiveInput],
) -> Result<(f64, Vec<f64>), RtmError> {
    let value = reflectance(band, settings, albedo, particulates, None)?;

    let inputs = DualInputs::new(albedo, particulates);
    let seeded = active
        .iter()
        .enumerate()
        .map(|(index, &input)| {
            let mut seeded = inputs.clone();
            if seeded.seed(input) {
                Ok(seeded)
            } else {
                Err(RtmError::OutOfRange {
                    quantity: "active input",
                    index,
                })
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    let derivatives = seeded
        .par_iter()
        .map(|inputs| {
            let particulates = Particulates::new(
                particulates.loc,
                &inputs.od,
                &inputs.ssa,
                &inputs.pf,
                inputs.pfc.view(),
            );
            reflectance(band, settings, &inputs.albedo, &particulates, None).map(|r| r.eps)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok((value, derivatives))
}

/// One independent reflectance calculation, typically one spectral band.
#[derive(Debug, Clone, Copy)]
pub struct BandCase<'a> {
    /// Band profile.
    pub band: &'a BandProfile,
    /// Surface albedo, one or two entries.
    pub albedo: &'a [f64],
    /// Particulate constituents.
    pub particulates: Particulates<'a, f64>,
}

/// Compute the reflectance of many independent cases in parallel. The
/// results are in the same order as `cases`.
pub fn reflectance_bands(
    cases: &[BandCase<'_>],
    settings: &SolverSettings,
) -> Vec<Result<f64, RtmError>> {
    info!("Computing reflectance for {} bands", cases.len());
    cases
        .par_iter()
        .map(|case| reflectance(case.band, settings, case.albedo, &case.particulates, None))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtm::Geometry;
    use ndarray::array;

    #[test]
    fn unknown_active_input_is_rejected() {
        let band = BandProfile::new(&[0.1], &[0.0], Geometry::new(0.5, 0.5, 0.0).unwrap()).unwrap();
        let pfc = array![[0.3]];
        let particulates = Particulates::new(&[0], &[1.0], &[0.9], &[0.6], pfc.view());
        let settings = SolverSettings::default();

        let result = reflectance_jacobian(
            &band,
            &settings,
            &[0.2],
            &particulates,
            &[
                ActiveInput::Od(0),
                ActiveInput::PhaseCoefficient {
                    constituent: 0,
                    column: 1,
                },
            ],
        );
        assert_eq!(
            result,
            Err(RtmError::OutOfRange {
                quantity: "active input",
                index: 1
            })
        );
    }

    #[test]
    fn batch_preserves_order_and_errors() {
        let geometry = Geometry::new(0.7, 0.9, 45.0).unwrap();
        let thin = BandProfile::new(&[0.01], &[0.0], geometry).unwrap();
        let thick = BandProfile::new(&[2.0], &[0.0], geometry).unwrap();
        let none = Particulates::none();

        let cases = [
            BandCase {
                band: &thin,
                albedo: &[0.0],
                particulates: none,
            },
            BandCase {
                band: &thick,
                albedo: &[0.0],
                particulates: none,
            },
            BandCase {
                band: &thick,
                albedo: &[],
                particulates: none,
            },
        ];
        let results = reflectance_bands(&cases, &SolverSettings::default());

        assert_eq!(results.len(), 3);
        assert!(results[0].as_ref().unwrap() < results[1].as_ref().unwrap());
        assert_eq!(results[2].clone().map_err(|e| e.status()), Err(1));
    }
}
