//! Merging of gas and particulate optical properties into layers.

use std::cmp::Ordering;

use ndarray::{ArrayView1, ArrayView2, Axis};
use smallvec::{smallvec, SmallVec};

use super::band::{BandProfile, RAYLEIGH_SECOND_MOMENT};
use super::scalar::Scalar;
use crate::error::RtmError;

/// Particulate constituents (aerosol, cloud) embedded in the column.
///
/// Constituent `i` sits in layer `loc[i]` and has optical depth `od[i]`,
/// single-scattering albedo `ssa[i]` and asymmetry factor `pf[i]`. Row `i`
/// of `pfc` holds its normalized Legendre moments of order 2, 3, and so on.
/// The first of these is the forward-peak fraction `f`, which must satisfy
/// `max(0, (3g² - 1)/2) <= f < 1` for asymmetry factor `g`.
/// When `pfc` has no columns, the forward-peak fraction of each constituent
/// is taken to be `pf²` (Henyey-Greenstein).
#[derive(Debug, Clone, Copy)]
pub struct Particulates<'a, T> {
    /// Layer index of each constituent.
    pub loc: &'a [usize],
    /// Optical depth of each constituent.
    pub od: &'a [T],
    /// Single-scattering albedo of each constituent.
    pub ssa: &'a [T],
    /// Asymmetry factor of each constituent.
    pub pf: &'a [T],
    /// Higher-order phase function moments, one row per constituent.
    pub pfc: ArrayView2<'a, T>,
}

impl<'a, T: Scalar> Particulates<'a, T> {
    /// Bundle the parallel particulate arrays.
    pub fn new(
        loc: &'a [usize],
        od: &'a [T],
        ssa: &'a [T],
        pf: &'a [T],
        pfc: ArrayView2<'a, T>,
    ) -> Self {
        Self {
            loc,
            od,
            ssa,
            pf,
            pfc,
        }
    }

    /// A clear-sky column with no particulates.
    pub fn none() -> Self {
        let empty: &'a [T] = &[];
        Self {
            loc: &[],
            od: empty,
            ssa: empty,
            pf: empty,
            pfc: ArrayView1::from(empty).insert_axis(Axis(1)),
        }
    }

    /// Number of constituents.
    pub fn len(&self) -> usize {
        self.loc.len()
    }

    /// Whether there are no constituents.
    pub fn is_empty(&self) -> bool {
        self.loc.is_empty()
    }

    /// Check shapes and value ranges against a column of `num_layers`.
    pub fn validate(&self, num_layers: usize) -> Result<(), RtmError> {
        let n = self.loc.len();
        if self.od.len() != n || self.ssa.len() != n || self.pf.len() != n {
            return Err(RtmError::DimensionMismatch {
                quantity: "particulate properties",
            });
        }
        if self.pfc.nrows() != n {
            return Err(RtmError::DimensionMismatch {
                quantity: "phase function coefficient table",
            });
        }

        let out_of_range = |quantity, index| Err(RtmError::OutOfRange { quantity, index });
        for i in 0..n {
            if self.loc[i] >= num_layers {
                return out_of_range("particulate layer index", i);
            }
            let od = self.od[i].value();
            if !(od.is_finite() && od >= 0.0) {
                return out_of_range("particulate optical depth", i);
            }
            if !(0.0..=1.0).contains(&self.ssa[i].value()) {
                return out_of_range("particulate single-scattering albedo", i);
            }
            if !(-1.0..=1.0).contains(&self.pf[i].value()) {
                return out_of_range("particulate asymmetry factor", i);
            }
            let row = self.pfc.row(i);
            if row.iter().any(|c| !c.value().is_finite()) {
                return out_of_range("phase function coefficient", i);
            }
            // A second moment below (3g² - 1)/2 would need E[μ²] < g²
            if let Some(f) = row.get(0) {
                let g = self.pf[i].value();
                let lower = (1.5 * g * g - 0.5).max(0.0);
                if !(lower..1.0).contains(&f.value()) {
                    return out_of_range("particulate forward-peak fraction", i);
                }
            }
        }
        Ok(())
    }
}

/// Effective optical properties of one layer.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedLayerProperty<T> {
    /// Total optical depth.
    pub od: T,
    /// Single-scattering albedo.
    pub ssa: T,
    /// Asymmetry factor.
    pub asymmetry: T,
    /// Normalized Legendre moments from order 2 upwards. Never empty.
    pub moments: SmallVec<[T; 4]>,
}

impl<T: Scalar> MergedLayerProperty<T> {
    /// Forward-peak fraction used by delta scaling.
    pub fn forward_fraction(&self) -> T {
        self.moments[0]
    }
}

/// Running sums for one layer. Phase-function terms are weighted by the
/// scattering optical depth.
struct LayerSums<T> {
    od: T,
    od_scattering: T,
    asymmetry: T,
    moments: SmallVec<[T; 4]>,
}

impl<T: Scalar> LayerSums<T> {
    fn gas(band: &BandProfile, layer: usize, num_moments: usize) -> Self {
        let zero = T::from_f64(0.0);
        let od_scattering = T::from_f64(band.od_rayleigh(layer));
        let mut moments: SmallVec<[T; 4]> = smallvec![zero; num_moments];
        moments[0] = od_scattering * T::from_f64(RAYLEIGH_SECOND_MOMENT);

        Self {
            od: T::from_f64(band.od_gas(layer)),
            od_scattering,
            asymmetry: zero,
            moments,
        }
    }

    fn add(&mut self, od: T, ssa: T, pf: T, pfc: ArrayView1<'_, T>) {
        let od_scattering = od * ssa;
        self.od = self.od + od;
        self.od_scattering = self.od_scattering + od_scattering;
        self.asymmetry = self.asymmetry + od_scattering * pf;
        if pfc.is_empty() {
            self.moments[0] = self.moments[0] + od_scattering * pf * pf;
        } else {
            for (sum, &coef) in self.moments.iter_mut().zip(pfc.iter()) {
                *sum = *sum + od_scattering * coef;
            }
        }
    }

    fn finish(self) -> MergedLayerProperty<T> {
        let zero = T::from_f64(0.0);
        let ssa = if self.od.value() > 0.0 {
            self.od_scattering * self.od.recip()
        } else {
            zero
        };

        if self.od_scattering.value() > 0.0 {
            let weight = self.od_scattering.recip();
            MergedLayerProperty {
                od: self.od,
                ssa,
                asymmetry: self.asymmetry * weight,
                moments: self.moments.into_iter().map(|m| m * weight).collect(),
            }
        } else {
            MergedLayerProperty {
                od: self.od,
                ssa,
                asymmetry: zero,
                moments: self.moments.iter().map(|_| zero).collect(),
            }
        }
    }
}

/// Order constituents by layer and then by their property values, so that
/// contributions to a layer are summed in a sequence that depends only on
/// the set of constituents and not on how the caller ordered them.
fn canonical_order<T: Scalar>(particulates: &Particulates<'_, T>) -> Vec<usize> {
    let cmp = |a: &T, b: &T| a.value().total_cmp(&b.value());
    let mut order: Vec<usize> = (0..particulates.len()).collect();
    order.sort_by(|&a, &b| {
        particulates.loc[a]
            .cmp(&particulates.loc[b])
            .then_with(|| cmp(&particulates.od[a], &particulates.od[b]))
            .then_with(|| cmp(&particulates.ssa[a], &particulates.ssa[b]))
            .then_with(|| cmp(&particulates.pf[a], &particulates.pf[b]))
            .then_with(|| {
                let row_a = particulates.pfc.row(a);
                let row_b = particulates.pfc.row(b);
                row_a
                    .iter()
                    .zip(row_b.iter())
                    .map(|(x, y)| cmp(x, y))
                    .find(|o| o.is_ne())
                    .unwrap_or(Ordering::Equal)
            })
    });
    order
}

/// Combine the band's gas properties with the particulate constituents,
/// producing one merged property per layer.
///
/// The particulates must already have passed [`Particulates::validate`].
pub(crate) fn merge_layers<T: Scalar>(
    band: &BandProfile,
    particulates: &Particulates<'_, T>,
) -> Vec<MergedLayerProperty<T>> {
    let num_moments = particulates.pfc.ncols().max(1);
    let mut sums: Vec<LayerSums<T>> = (0..band.num_layers())
        .map(|layer| LayerSums::gas(band, layer, num_moments))
        .collect();

    for i in canonical_order(particulates) {
        sums[particulates.loc[i]].add(
            particulates.od[i],
            particulates.ssa[i],
            particulates.pf[i],
            particulates.pfc.row(i),
        );
    }

    sums.into_iter().map(LayerSums::finish).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtm::band::Geometry;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn band() -> BandProfile {
        let geometry = Geometry::new(0.8, 0.9, 30.0).unwrap();
        BandProfile::new(&[0.02, 0.05, 0.1], &[0.01, 0.0, 0.0], geometry).unwrap()
    }

    #[test]
    fn gas_only_layers() {
        let merged = merge_layers(&band(), &Particulates::<f64>::none());
        assert_eq!(merged.len(), 3);

        assert_relative_eq!(merged[0].od, 0.03);
        assert_relative_eq!(merged[0].ssa, 0.02 / 0.03);
        assert_relative_eq!(merged[1].ssa, 1.0);
        assert_eq!(merged[2].asymmetry, 0.0);
        assert_relative_eq!(merged[2].forward_fraction(), RAYLEIGH_SECOND_MOMENT);
    }

    #[test]
    fn constituents_in_one_layer_are_weighted_by_scattering_depth() {
        let pfc = array![[0.5], [0.2]];
        let particulates = Particulates::new(
            &[1, 1],
            &[0.4, 0.2],
            &[0.5, 1.0],
            &[0.8, 0.4],
            pfc.view(),
        );
        let merged = merge_layers(&band(), &particulates);

        // Scattering depths: gas 0.05, first 0.2, second 0.2
        let od_scattering = 0.05 + 0.2 + 0.2;
        assert_relative_eq!(merged[1].od, 0.05 + 0.4 + 0.2);
        assert_relative_eq!(merged[1].ssa, od_scattering / 0.65);
        assert_relative_eq!(
            merged[1].asymmetry,
            (0.2 * 0.8 + 0.2 * 0.4) / od_scattering
        );
        assert_relative_eq!(
            merged[1].forward_fraction(),
            (0.05 * 0.1 + 0.2 * 0.5 + 0.2 * 0.2) / od_scattering
        );

        // Other layers untouched
        assert_eq!(merged[0], merge_layers(&band(), &Particulates::none())[0]);
    }

    #[test]
    fn empty_table_uses_henyey_greenstein_fraction() {
        let pfc = ndarray::Array2::<f64>::zeros((1, 0));
        let particulates = Particulates::new(&[2], &[1.0], &[1.0], &[0.7], pfc.view());
        let merged = merge_layers(&band(), &particulates);

        assert_relative_eq!(
            merged[2].forward_fraction(),
            (0.1 * 0.1 + 0.49) / 1.1
        );
    }

    #[test]
    fn zero_depth_layer_has_zero_properties() {
        let geometry = Geometry::new(0.8, 0.9, 30.0).unwrap();
        let band = BandProfile::new(&[0.0], &[0.0], geometry).unwrap();
        let merged = merge_layers(&band, &Particulates::<f64>::none());
        assert_eq!(merged[0].od, 0.0);
        assert_eq!(merged[0].ssa, 0.0);
        assert_eq!(merged[0].forward_fraction(), 0.0);
    }

    #[test]
    fn validation_reports_the_offending_element() {
        let pfc = array![[0.1], [0.1]];
        let bad_layer =
            Particulates::new(&[0, 3], &[0.1, 0.1], &[0.9, 0.9], &[0.5, 0.5], pfc.view());
        assert_eq!(
            bad_layer.validate(3),
            Err(RtmError::OutOfRange {
                quantity: "particulate layer index",
                index: 1
            })
        );

        let bad_ssa =
            Particulates::new(&[0, 1], &[0.1, 0.1], &[1.2, 0.9], &[0.5, 0.5], pfc.view());
        assert_eq!(bad_ssa.validate(3).map_err(|e| e.status()), Err(2));

        let short = Particulates::new(&[0, 1], &[0.1], &[0.9, 0.9], &[0.5, 0.5], pfc.view());
        assert_eq!(short.validate(3).map_err(|e| e.status()), Err(1));

        let table = array![[0.1]];
        let short_table =
            Particulates::new(&[0, 1], &[0.1, 0.1], &[0.9, 0.9], &[0.5, 0.5], table.view());
        assert_eq!(
            short_table.validate(3),
            Err(RtmError::DimensionMismatch {
                quantity: "phase function coefficient table"
            })
        );
    }

    #[test]
    fn forward_fraction_must_fit_the_asymmetry() {
        let check = |g: f64, f: f64| {
            let pfc = array![[f]];
            Particulates::new(&[0], &[0.01], &[1.0], &[g], pfc.view()).validate(1)
        };
        let rejected = Err(RtmError::OutOfRange {
            quantity: "particulate forward-peak fraction",
            index: 0,
        });

        assert_eq!(check(0.9, 0.0), rejected);
        assert_eq!(check(0.3, -1.0), rejected);
        assert_eq!(check(0.3, 1.0), rejected);
        assert_eq!(check(0.9, 0.7), rejected);

        assert_eq!(check(0.9, 0.72), Ok(()));
        assert_eq!(check(0.3, 0.0), Ok(()));
        assert_eq!(check(-0.5, 0.2), Ok(()));
    }
}
