//! Per-band atmospheric profile.
//!
//! A [`BandProfile`] holds the gas and Rayleigh optical depth of each layer
//! for one spectral band, along with the sun/instrument geometry. Layers are
//! ordered from the top of the atmosphere (index 0) down to the layer that
//! touches the surface.

use smallvec::SmallVec;

use crate::error::RtmError;

/// Normalized second Legendre moment of the Rayleigh phase function.
pub(crate) const RAYLEIGH_SECOND_MOMENT: f64 = 0.1;

/// Sun and instrument geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    /// Cosine of the solar zenith angle.
    pub mu_sun: f64,
    /// Cosine of the instrument zenith angle.
    pub mu_view: f64,
    /// Azimuth between sun and instrument in degrees. 180° places the
    /// instrument on the same side as the sun (backscatter).
    pub relative_azimuth: f64,
}

impl Geometry {
    /// Validate the zenith cosines, which must be in (0, 1].
    pub fn new(mu_sun: f64, mu_view: f64, relative_azimuth: f64) -> Result<Self, RtmError> {
        let in_range = |mu: f64| mu > 0.0 && mu <= 1.0;
        if !in_range(mu_sun) {
            return Err(RtmError::OutOfRange {
                quantity: "solar zenith cosine",
                index: 0,
            });
        }
        if !in_range(mu_view) {
            return Err(RtmError::OutOfRange {
                quantity: "instrument zenith cosine",
                index: 0,
            });
        }
        if !relative_azimuth.is_finite() {
            return Err(RtmError::OutOfRange {
                quantity: "relative azimuth",
                index: 0,
            });
        }
        Ok(Self {
            mu_sun,
            mu_view,
            relative_azimuth,
        })
    }

    /// Cosine of the single-scattering angle between the incoming solar beam
    /// and the direction towards the instrument.
    pub fn scattering_angle_cosine(&self) -> f64 {
        let sin_sun = f64::sqrt(1.0 - self.mu_sun.powi(2));
        let sin_view = f64::sqrt(1.0 - self.mu_view.powi(2));
        -self.mu_sun * self.mu_view + sin_sun * sin_view * self.relative_azimuth.to_radians().cos()
    }
}

/// Optical profile of one spectral band.
#[derive(Debug, Clone, PartialEq)]
pub struct BandProfile {
    /// Rayleigh (conservative) scattering optical depth per layer.
    od_rayleigh: SmallVec<[f64; 64]>,
    /// Gas absorption optical depth per layer.
    od_absorption: SmallVec<[f64; 64]>,
    geometry: Geometry,
    /// Fraction of the band's incident flux, applied to the final
    /// reflectance.
    flux_normalization: f64,
    /// Fraction of the incident flux that arrives diffuse rather than as the
    /// collimated solar beam.
    diffuse_fraction: f64,
}

impl BandProfile {
    /// Build a profile from per-layer Rayleigh and absorption optical depths.
    ///
    /// The two slices must have the same, non-zero length and contain finite,
    /// non-negative values.
    pub fn new(
        od_rayleigh: &[f64],
        od_absorption: &[f64],
        geometry: Geometry,
    ) -> Result<Self, RtmError> {
        if od_rayleigh.is_empty() || od_rayleigh.len() != od_absorption.len() {
            return Err(RtmError::DimensionMismatch {
                quantity: "band optical depth",
            });
        }
        check_depths(od_rayleigh, "Rayleigh optical depth")?;
        check_depths(od_absorption, "gas absorption optical depth")?;

        Ok(Self {
            od_rayleigh: SmallVec::from_slice(od_rayleigh),
            od_absorption: SmallVec::from_slice(od_absorption),
            geometry,
            flux_normalization: 1.0,
            diffuse_fraction: 0.0,
        })
    }

    /// Set the incident flux normalization, which must be in (0, 1].
    pub fn with_flux_normalization(mut self, flux_normalization: f64) -> Result<Self, RtmError> {
        if !(flux_normalization > 0.0 && flux_normalization <= 1.0) {
            return Err(RtmError::OutOfRange {
                quantity: "flux normalization",
                index: 0,
            });
        }
        self.flux_normalization = flux_normalization;
        Ok(self)
    }

    /// Set the diffuse fraction of the incident flux, which must be in [0, 1].
    pub fn with_diffuse_fraction(mut self, diffuse_fraction: f64) -> Result<Self, RtmError> {
        if !(0.0..=1.0).contains(&diffuse_fraction) {
            return Err(RtmError::OutOfRange {
                quantity: "diffuse fraction",
                index: 0,
            });
        }
        self.diffuse_fraction = diffuse_fraction;
        Ok(self)
    }

    /// Number of layers.
    pub fn num_layers(&self) -> usize {
        self.od_rayleigh.len()
    }

    /// Total gas optical depth (Rayleigh plus absorption) of a layer.
    pub fn od_gas(&self, layer: usize) -> f64 {
        self.od_rayleigh[layer] + self.od_absorption[layer]
    }

    /// Rayleigh scattering optical depth of a layer.
    pub fn od_rayleigh(&self, layer: usize) -> f64 {
        self.od_rayleigh[layer]
    }

    /// Sun and instrument geometry.
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Cosine of the solar zenith angle.
    pub fn mu_sun(&self) -> f64 {
        self.geometry.mu_sun
    }

    /// Incident flux normalization.
    pub fn flux_normalization(&self) -> f64 {
        self.flux_normalization
    }

    /// Diffuse fraction of the incident flux.
    pub fn diffuse_fraction(&self) -> f64 {
        self.diffuse_fraction
    }

    /// Rayleigh phase function at the band's scattering angle, normalized so
    /// that its average over the sphere is 1.
    pub fn rayleigh_phase(&self) -> f64 {
        0.75 * (1.0 + self.geometry.scattering_angle_cosine().powi(2))
    }
}

fn check_depths(depths: &[f64], quantity: &'static str) -> Result<(), RtmError> {
    match depths.iter().position(|&od| !(od.is_finite() && od >= 0.0)) {
        Some(index) => Err(RtmError::OutOfRange { quantity, index }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn overhead() -> Geometry {
        Geometry::new(1.0, 1.0, 0.0).unwrap()
    }

    #[test]
    fn rejects_bad_geometry() {
        assert!(Geometry::new(0.0, 0.5, 0.0).is_err());
        assert!(Geometry::new(0.5, 1.2, 0.0).is_err());
        assert!(Geometry::new(0.5, 0.5, f64::NAN).is_err());
    }

    #[test]
    fn overhead_sun_and_nadir_view_is_backscatter() {
        assert_abs_diff_eq!(overhead().scattering_angle_cosine(), -1.0);

        let band = BandProfile::new(&[0.1], &[0.0], overhead()).unwrap();
        assert_abs_diff_eq!(band.rayleigh_phase(), 1.5);
    }

    #[test]
    fn rejects_mismatched_or_negative_depths() {
        assert_eq!(
            BandProfile::new(&[0.1, 0.2], &[0.0], overhead()),
            Err(RtmError::DimensionMismatch {
                quantity: "band optical depth"
            })
        );
        assert!(BandProfile::new(&[], &[], overhead()).is_err());
        assert_eq!(
            BandProfile::new(&[0.1, -0.2], &[0.0, 0.0], overhead()),
            Err(RtmError::OutOfRange {
                quantity: "Rayleigh optical depth",
                index: 1
            })
        );
    }

    #[test]
    fn builder_validates_flux_split() {
        let band = BandProfile::new(&[0.1], &[0.05], overhead()).unwrap();
        assert!(band.clone().with_flux_normalization(0.0).is_err());
        assert!(band.clone().with_diffuse_fraction(1.5).is_err());

        let band = band
            .with_flux_normalization(0.8)
            .unwrap()
            .with_diffuse_fraction(0.25)
            .unwrap();
        assert_eq!(band.flux_normalization(), 0.8);
        assert_eq!(band.diffuse_fraction(), 0.25);
        assert_abs_diff_eq!(band.od_gas(0), 0.15);
    }
}
