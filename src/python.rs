//! Interface between Rust and Python.
//!
//! The arrays passed in from Python are copied into owned Rust values up
//! front so the per-band work can run on a rayon pool without holding the
//! GIL.

use log::{debug, info};
use ndarray::{Array1, Array2, Array3, Axis};
use numpy::prelude::*;
use numpy::{
    PyArray1, PyArray2, PyReadonlyArray1, PyReadonlyArray2, PyReadonlyArray3, ToPyArray,
};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use rayon::prelude::*;

use crate::error::RtmError;
use crate::rtm::{
    reflectance, reflectance_jacobian, ActiveInput, BandProfile, Geometry, Particulates,
    SolverSettings,
};

impl From<RtmError> for PyErr {
    fn from(e: RtmError) -> Self {
        PyValueError::new_err(e.to_string())
    }
}

/// Reflectance and its sensitivities.
///
/// Each derivative array is dimensioned as (`num_bands`, `n`) where `n` is
/// the number of albedo entries or particulate constituents.
#[pyclass]
struct ReflectanceJacobian {
    reflectance: Array1<f64>,
    d_albedo: Array2<f64>,
    d_od: Array2<f64>,
    d_ssa: Array2<f64>,
    d_pf: Array2<f64>,
}

/// Implement all the "getters" for the Python properties
#[pymethods]
impl ReflectanceJacobian {
    #[getter]
    fn reflectance<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray1<f64>> {
        self.reflectance.to_pyarray(py)
    }

    #[getter]
    fn d_albedo<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray2<f64>> {
        self.d_albedo.to_pyarray(py)
    }

    #[getter]
    fn d_od<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray2<f64>> {
        self.d_od.to_pyarray(py)
    }

    #[getter]
    fn d_ssa<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray2<f64>> {
        self.d_ssa.to_pyarray(py)
    }

    #[getter]
    fn d_pf<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray2<f64>> {
        self.d_pf.to_pyarray(py)
    }
}

/// Owned copy of the per-band inputs.
struct BandInputs {
    bands: Vec<BandProfile>,
    albedo: Vec<Vec<f64>>,
    loc: Vec<usize>,
    od: Vec<Vec<f64>>,
    ssa: Vec<Vec<f64>>,
    pf: Vec<Vec<f64>>,
    pfc: Array3<f64>,
}

impl BandInputs {
    #[allow(clippy::too_many_arguments)]
    fn new(
        od_rayleigh: PyReadonlyArray2<'_, f64>,
        od_absorption: PyReadonlyArray2<'_, f64>,
        mu_sun: f64,
        mu_view: f64,
        azimuth: f64,
        albedo: PyReadonlyArray2<'_, f64>,
        loc: PyReadonlyArray1<'_, i64>,
        od: PyReadonlyArray2<'_, f64>,
        ssa: PyReadonlyArray2<'_, f64>,
        pf: PyReadonlyArray2<'_, f64>,
        pfc: PyReadonlyArray3<'_, f64>,
    ) -> Result<Self, RtmError> {
        let num_bands = od_rayleigh.shape()[0];
        let num_particulates = loc.len();

        // Check shapes of all inputs
        {
            let per_band = &[
                od_absorption.shape()[0],
                albedo.shape()[0],
                od.shape()[0],
                ssa.shape()[0],
                pf.shape()[0],
                pfc.shape()[0],
            ];
            let per_particulate = &[od.shape()[1], ssa.shape()[1], pf.shape()[1], pfc.shape()[1]];

            if per_band.iter().any(|&d| d != num_bands) {
                return Err(RtmError::DimensionMismatch {
                    quantity: "number of bands",
                });
            }
            if per_particulate.iter().any(|&d| d != num_particulates) {
                return Err(RtmError::DimensionMismatch {
                    quantity: "number of particulates",
                });
            }
        }
        debug!("input shapes are consistent");

        let geometry = Geometry::new(mu_sun, mu_view, azimuth)?;
        let bands = od_rayleigh
            .as_array()
            .outer_iter()
            .zip(od_absorption.as_array().outer_iter())
            .map(|(rayleigh, absorption)| {
                BandProfile::new(&rayleigh.to_vec(), &absorption.to_vec(), geometry)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let loc = loc
            .as_array()
            .iter()
            .enumerate()
            .map(|(index, &l)| {
                usize::try_from(l).map_err(|_| RtmError::OutOfRange {
                    quantity: "particulate layer index",
                    index,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let rows = |a: &PyReadonlyArray2<'_, f64>| -> Vec<Vec<f64>> {
            a.as_array().outer_iter().map(|row| row.to_vec()).collect()
        };

        Ok(Self {
            bands,
            albedo: rows(&albedo),
            loc,
            od: rows(&od),
            ssa: rows(&ssa),
            pf: rows(&pf),
            pfc: pfc.as_array().to_owned(),
        })
    }

    fn num_bands(&self) -> usize {
        self.bands.len()
    }

    fn particulates(&self, band: usize) -> Particulates<'_, f64> {
        Particulates::new(
            &self.loc,
            &self.od[band],
            &self.ssa[band],
            &self.pf[band],
            self.pfc.index_axis(Axis(0), band),
        )
    }
}

fn thread_pool(num_threads: Option<usize>) -> PyResult<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads.unwrap_or(0))
        .build()
        .map_err(|e| PyValueError::new_err(e.to_string()))
}

/// Compute the band reflectance of a plane-parallel atmosphere.
///
/// The band profile inputs have shape (`num_bands`, `num_layers`), with layer
/// 0 at the top of the atmosphere:
///
/// `od_rayleigh`: Rayleigh scattering optical depth
///
/// `od_absorption`: gas absorption optical depth
///
/// The geometry is shared by all bands:
///
/// `mu_sun`, `mu_view`: cosines of the solar and instrument zenith angles
///
/// `azimuth`: relative azimuth in degrees
///
/// `albedo` has shape (`num_bands`, 1) or (`num_bands`, 2), the latter
/// giving the diffuse and direct-beam albedo separately.
///
/// `loc` has shape (`num_particulates`, ) and gives the layer index of each
/// particulate constituent. `od`, `ssa` and `pf` (asymmetry factor) have
/// shape (`num_bands`, `num_particulates`), and `pfc` has shape
/// (`num_bands`, `num_particulates`, `num_coefficients`).
///
/// The number of worker threads is controlled by `num_threads`. It must be a
/// positive integer, or `None` to automatically choose the number of threads.
#[pyfunction]
#[pyo3(signature = (od_rayleigh, od_absorption, mu_sun, mu_view, azimuth, albedo, loc, od, ssa, pf, pfc, num_threads))]
#[allow(clippy::too_many_arguments)]
fn compute_reflectance<'py>(
    py: Python<'py>,
    od_rayleigh: PyReadonlyArray2<'_, f64>,
    od_absorption: PyReadonlyArray2<'_, f64>,
    mu_sun: f64,
    mu_view: f64,
    azimuth: f64,
    albedo: PyReadonlyArray2<'_, f64>,
    loc: PyReadonlyArray1<'_, i64>,
    od: PyReadonlyArray2<'_, f64>,
    ssa: PyReadonlyArray2<'_, f64>,
    pf: PyReadonlyArray2<'_, f64>,
    pfc: PyReadonlyArray3<'_, f64>,
    num_threads: Option<usize>,
) -> PyResult<Bound<'py, PyArray1<f64>>> {
    let inputs = BandInputs::new(
        od_rayleigh,
        od_absorption,
        mu_sun,
        mu_view,
        azimuth,
        albedo,
        loc,
        od,
        ssa,
        pf,
        pfc,
    )?;
    let pool = thread_pool(num_threads)?;
    let settings = SolverSettings::default();

    info!("Processing reflectance for {} bands", inputs.num_bands());
    let results: Vec<f64> = py.allow_threads(|| {
        pool.install(|| {
            (0..inputs.num_bands())
                .into_par_iter()
                .map(|band| {
                    reflectance(
                        &inputs.bands[band],
                        &settings,
                        &inputs.albedo[band],
                        &inputs.particulates(band),
                        None,
                    )
                })
                .collect::<Result<Vec<_>, RtmError>>()
        })
    })?;

    Ok(Array1::from(results).to_pyarray(py))
}

/// Compute the band reflectance and its derivatives with respect to the
/// albedo and to the optical depth, single-scattering albedo and asymmetry
/// factor of every particulate constituent.
///
/// The inputs are the same as for `compute_reflectance`.
#[pyfunction]
#[pyo3(signature = (od_rayleigh, od_absorption, mu_sun, mu_view, azimuth, albedo, loc, od, ssa, pf, pfc, num_threads))]
#[allow(clippy::too_many_arguments)]
fn compute_jacobian(
    py: Python<'_>,
    od_rayleigh: PyReadonlyArray2<'_, f64>,
    od_absorption: PyReadonlyArray2<'_, f64>,
    mu_sun: f64,
    mu_view: f64,
    azimuth: f64,
    albedo: PyReadonlyArray2<'_, f64>,
    loc: PyReadonlyArray1<'_, i64>,
    od: PyReadonlyArray2<'_, f64>,
    ssa: PyReadonlyArray2<'_, f64>,
    pf: PyReadonlyArray2<'_, f64>,
    pfc: PyReadonlyArray3<'_, f64>,
    num_threads: Option<usize>,
) -> PyResult<ReflectanceJacobian> {
    let num_albedo = albedo.shape()[1];
    let inputs = BandInputs::new(
        od_rayleigh,
        od_absorption,
        mu_sun,
        mu_view,
        azimuth,
        albedo,
        loc,
        od,
        ssa,
        pf,
        pfc,
    )?;
    let num_bands = inputs.num_bands();
    let num_particulates = inputs.loc.len();
    let pool = thread_pool(num_threads)?;
    let settings = SolverSettings::default();

    let active: Vec<ActiveInput> = (0..num_albedo)
        .map(ActiveInput::Albedo)
        .chain((0..num_particulates).map(ActiveInput::Od))
        .chain((0..num_particulates).map(ActiveInput::Ssa))
        .chain((0..num_particulates).map(ActiveInput::Asymmetry))
        .collect();

    info!(
        "Processing reflectance sensitivities for {num_bands} bands and {} inputs",
        active.len()
    );
    let results = py.allow_threads(|| {
        pool.install(|| {
            (0..num_bands)
                .into_par_iter()
                .map(|band| {
                    reflectance_jacobian(
                        &inputs.bands[band],
                        &settings,
                        &inputs.albedo[band],
                        &inputs.particulates(band),
                        &active,
                    )
                })
                .collect::<Result<Vec<_>, RtmError>>()
        })
    })?;

    // Copy the per-band results to the output arrays
    debug!("copying jacobian output");
    let mut output = ReflectanceJacobian {
        reflectance: Array1::zeros(num_bands),
        d_albedo: Array2::zeros([num_bands, num_albedo]),
        d_od: Array2::zeros([num_bands, num_particulates]),
        d_ssa: Array2::zeros([num_bands, num_particulates]),
        d_pf: Array2::zeros([num_bands, num_particulates]),
    };
    for (band, (value, derivatives)) in results.into_iter().enumerate() {
        output.reflectance[band] = value;

        let (d_albedo, rest) = derivatives.split_at(num_albedo);
        let (d_od, rest) = rest.split_at(num_particulates);
        let (d_ssa, d_pf) = rest.split_at(num_particulates);
        for (target, source) in [
            (&mut output.d_albedo, d_albedo),
            (&mut output.d_od, d_od),
            (&mut output.d_ssa, d_ssa),
            (&mut output.d_pf, d_pf),
        ] {
            target
                .index_axis_mut(Axis(0), band)
                .assign(&ndarray::ArrayView1::from(source));
        }
    }

    Ok(output)
}

/// A Python module implemented in Rust.
#[pymodule]
fn reflectance_rtm(m: &Bound<'_, PyModule>) -> PyResult<()> {
    pyo3_log::init();

    m.add_function(wrap_pyfunction!(compute_reflectance, m)?)?;
    m.add_function(wrap_pyfunction!(compute_jacobian, m)?)?;
    m.add_class::<ReflectanceJacobian>()?;
    Ok(())
}
