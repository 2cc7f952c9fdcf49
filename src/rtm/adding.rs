//! Adding method: combine layer responses from the surface upwards.

use super::scalar::Scalar;
use super::two_stream::LayerOperator;
use crate::error::RtmError;

/// Lambertian surface albedo.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceAlbedo<T> {
    /// Albedo for diffuse illumination.
    pub diffuse: T,
    /// Albedo for the direct beam.
    pub direct: T,
}

impl<T: Scalar> SurfaceAlbedo<T> {
    /// Interpret a per-stream albedo array: either one value used for both
    /// streams, or `[diffuse, direct]`. Each value must be in [0, 1].
    pub fn from_slice(albedo: &[T]) -> Result<Self, RtmError> {
        let (diffuse, direct) = match *albedo {
            [both] => (both, both),
            [diffuse, direct] => (diffuse, direct),
            _ => {
                return Err(RtmError::DimensionMismatch {
                    quantity: "surface albedo",
                })
            }
        };
        if let Some(index) = albedo
            .iter()
            .position(|a| !(0.0..=1.0).contains(&a.value()))
        {
            return Err(RtmError::OutOfRange {
                quantity: "surface albedo",
                index,
            });
        }
        Ok(Self { diffuse, direct })
    }
}

/// Combined response of a block of layers, seen from its top.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColumnOperator<T> {
    /// Reflectance for diffuse illumination.
    pub reflectance_diffuse: T,
    /// Diffuse reflectance for the direct beam.
    pub reflectance_direct: T,
    /// Diffuse transmittance through the bottom of the block.
    pub transmittance_diffuse: T,
    /// Part of the direct beam leaving the bottom as diffuse flux.
    pub transmittance_direct_diffuse: T,
    /// Part of the direct beam leaving the bottom unscattered.
    pub transmittance_direct: T,
}

impl<T: Scalar> ColumnOperator<T> {
    /// The lower boundary: a Lambertian reflector that transmits nothing.
    pub fn surface(albedo: &SurfaceAlbedo<T>) -> Self {
        let zero = T::from_f64(0.0);
        Self {
            reflectance_diffuse: albedo.diffuse,
            reflectance_direct: albedo.direct,
            transmittance_diffuse: zero,
            transmittance_direct_diffuse: zero,
            transmittance_direct: zero,
        }
    }
}

/// Place `layer` on top of `column` and return the response of the combined
/// block.
///
/// Multiple reflections between the layer and the block below are summed
/// exactly through the geometric series 1 / (1 − R_layer R_column).
pub fn add_layer_above<T: Scalar>(
    column: &ColumnOperator<T>,
    layer: &LayerOperator<T>,
) -> ColumnOperator<T> {
    let one = T::from_f64(1.0);
    let inv_denom = (one - layer.reflectance_diffuse * column.reflectance_diffuse).recip();

    // Diffuse fluxes at the interface for a unit direct beam at the top
    let up = (column.reflectance_direct * layer.transmittance_direct
        + column.reflectance_diffuse * layer.transmittance_direct_diffuse)
        * inv_denom;
    let down = (layer.transmittance_direct_diffuse
        + layer.reflectance_diffuse * column.reflectance_direct * layer.transmittance_direct)
        * inv_denom;

    ColumnOperator {
        reflectance_diffuse: layer.reflectance_diffuse
            + layer.transmittance_diffuse
                * layer.transmittance_diffuse
                * column.reflectance_diffuse
                * inv_denom,
        reflectance_direct: layer.reflectance_direct + layer.transmittance_diffuse * up,
        transmittance_diffuse: layer.transmittance_diffuse
            * column.transmittance_diffuse
            * inv_denom,
        transmittance_direct_diffuse: layer.transmittance_direct
            * column.transmittance_direct_diffuse
            + down * column.transmittance_diffuse,
        transmittance_direct: layer.transmittance_direct * column.transmittance_direct,
    }
}

/// Fold layers onto the surface. `bottom_up` runs from the layer touching
/// the surface to the top of the atmosphere.
pub fn combine_layers<'a, T, I>(surface: ColumnOperator<T>, bottom_up: I) -> ColumnOperator<T>
where
    T: Scalar + 'a,
    I: IntoIterator<Item = &'a LayerOperator<T>>,
{
    bottom_up
        .into_iter()
        .fold(surface, |column, layer| add_layer_above(&column, layer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtm::merge::MergedLayerProperty;
    use crate::rtm::two_stream::solve_layer;
    use crate::rtm::{PhaseScaling, SolverSettings};
    use approx::assert_relative_eq;
    use smallvec::smallvec;

    fn slab() -> LayerOperator<f64> {
        LayerOperator {
            reflectance_diffuse: 0.2,
            transmittance_diffuse: 0.7,
            reflectance_direct: 0.15,
            transmittance_direct_diffuse: 0.25,
            transmittance_direct: 0.5,
        }
    }

    fn as_column(layer: &LayerOperator<f64>) -> ColumnOperator<f64> {
        ColumnOperator {
            reflectance_diffuse: layer.reflectance_diffuse,
            reflectance_direct: layer.reflectance_direct,
            transmittance_diffuse: layer.transmittance_diffuse,
            transmittance_direct_diffuse: layer.transmittance_direct_diffuse,
            transmittance_direct: layer.transmittance_direct,
        }
    }

    #[test]
    fn albedo_streams() {
        assert_eq!(
            SurfaceAlbedo::from_slice(&[0.3]),
            Ok(SurfaceAlbedo {
                diffuse: 0.3,
                direct: 0.3
            })
        );
        assert_eq!(SurfaceAlbedo::from_slice(&[0.3, 0.4]).unwrap().direct, 0.4);
        assert_eq!(
            SurfaceAlbedo::<f64>::from_slice(&[]).map_err(|e| e.status()),
            Err(1)
        );
        assert_eq!(
            SurfaceAlbedo::from_slice(&[0.3, 1.1]),
            Err(RtmError::OutOfRange {
                quantity: "surface albedo",
                index: 1
            })
        );
    }

    #[test]
    fn identity_layer_changes_nothing() {
        let surface = ColumnOperator::surface(&SurfaceAlbedo::from_slice(&[0.3, 0.6]).unwrap());
        let column = add_layer_above(&surface, &LayerOperator::identity());
        assert_eq!(column, surface);
    }

    #[test]
    fn black_surface_sees_only_the_layer() {
        let surface = ColumnOperator::surface(&SurfaceAlbedo::from_slice(&[0.0]).unwrap());
        let column = add_layer_above(&surface, &slab());

        assert_eq!(column.reflectance_diffuse, 0.2);
        assert_eq!(column.reflectance_direct, 0.15);
        assert_eq!(column.transmittance_diffuse, 0.0);
        assert_eq!(column.transmittance_direct, 0.0);
    }

    #[test]
    fn multiple_reflection_series_is_summed() {
        let albedo = 0.5;
        let surface = ColumnOperator::surface(&SurfaceAlbedo::from_slice(&[albedo]).unwrap());
        let column = add_layer_above(&surface, &slab());

        // Explicit partial sum of the series of bounces
        let l = slab();
        let series: f64 = (0..200)
            .map(|n| (l.reflectance_diffuse * albedo).powi(n))
            .sum();
        assert_relative_eq!(
            column.reflectance_diffuse,
            l.reflectance_diffuse + l.transmittance_diffuse.powi(2) * albedo * series,
            max_relative = 1e-14
        );
        let first_bounce =
            l.transmittance_direct * albedo + l.transmittance_direct_diffuse * albedo;
        assert_relative_eq!(
            column.reflectance_direct,
            l.reflectance_direct + l.transmittance_diffuse * first_bounce * series,
            max_relative = 1e-14
        );
    }

    #[test]
    fn two_half_layers_make_one_layer() {
        // Two-stream solutions are exact for a homogeneous layer, so
        // doubling a half-thickness layer must reproduce the full layer
        let settings = SolverSettings {
            scaling: PhaseScaling::None,
            ..SolverSettings::default()
        };
        let property = |od| MergedLayerProperty {
            od,
            ssa: 0.9,
            asymmetry: 0.6,
            moments: smallvec![0.36],
        };
        let mu = 0.55;
        let half = solve_layer(&property(0.8), mu, &settings, 0).unwrap();
        let full = solve_layer(&property(1.6), mu, &settings, 0).unwrap();
        let doubled = add_layer_above(&as_column(&half), &half);

        assert_relative_eq!(
            doubled.reflectance_diffuse,
            full.reflectance_diffuse,
            max_relative = 1e-12
        );
        assert_relative_eq!(
            doubled.transmittance_diffuse,
            full.transmittance_diffuse,
            max_relative = 1e-12
        );
        assert_relative_eq!(
            doubled.reflectance_direct,
            full.reflectance_direct,
            max_relative = 1e-12
        );
        assert_relative_eq!(
            doubled.transmittance_direct_diffuse,
            full.transmittance_direct_diffuse,
            max_relative = 1e-12
        );
        assert_relative_eq!(
            doubled.transmittance_direct,
            full.transmittance_direct,
            max_relative = 1e-12
        );
    }

    #[test]
    fn fold_runs_from_the_surface_up() {
        let top = slab();
        let bottom = LayerOperator {
            reflectance_diffuse: 0.1,
            transmittance_diffuse: 0.8,
            reflectance_direct: 0.05,
            transmittance_direct_diffuse: 0.3,
            transmittance_direct: 0.6,
        };
        let surface = ColumnOperator::surface(&SurfaceAlbedo::from_slice(&[0.4, 0.2]).unwrap());

        let folded = combine_layers(surface, [&bottom, &top]);
        let stepwise = add_layer_above(&add_layer_above(&surface, &bottom), &top);
        assert_eq!(folded, stepwise);
    }
}
