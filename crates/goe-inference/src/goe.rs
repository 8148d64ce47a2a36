//! GoE physics log-posterior.
//!
//! Five parameters, fixed order:
//!
//! | name           | bounds         | scale  |
//! |----------------|----------------|--------|
//! | `H_sigma`      | (0, 1)         | linear |
//! | `rho_crit_NET` | (1e-6, 1e-2)   | log    |
//! | `a_min`        | (1e-33, 1e-27) | log    |
//! | `M_seed`       | (1e3, 1e7)     | log    |
//! | `f_NET`        | (1e-4, 0.1)    | linear |
//!
//! The density combines a uniform prior on the box, two soft Gaussian
//! penalties on the bounce parameters, and four observational terms (CMB axis
//! alignment, PTA helicity, high-z SMBH masses, filament alignment). Each
//! observational term is only active when the data it needs is present.

use std::f64::consts::LN_10;
use std::path::Path;

use goe_core::{Error, LogDensityModel, ParameterScale, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// Parameter names in sampling order.
pub const PARAMETER_NAMES: [&str; 5] = ["H_sigma", "rho_crit_NET", "a_min", "M_seed", "f_NET"];

/// Closed support of each parameter.
pub const PARAMETER_BOUNDS: [(f64, f64); 5] =
    [(0.0, 1.0), (1e-6, 1e-2), (1e-33, 1e-27), (1e3, 1e7), (1e-4, 0.1)];

/// Transform scale of each parameter.
pub const PARAMETER_SCALES: [ParameterScale; 5] = [
    ParameterScale::Linear,
    ParameterScale::Log,
    ParameterScale::Log,
    ParameterScale::Log,
    ParameterScale::Linear,
];

const H_SIGMA: usize = 0;
const RHO_CRIT: usize = 1;
const A_MIN: usize = 2;
const M_SEED: usize = 3;
const F_NET: usize = 4;

/// Penalty centres (log10) and width for the bounce parameters.
const A_MIN_LOG10_CENTER: f64 = -30.0;
const RHO_CRIT_LOG10_CENTER: f64 = -4.0;
const PENALTY_WIDTH: f64 = 0.5;

const PTA_SIGMA: f64 = 0.05;
const BH_SIGMA_DEX: f64 = 0.3;
const BH_HIGHZ_CUT: f64 = 9.0;
const BH_BONUS_MASS: f64 = 1e5;
const BH_BONUS_WEIGHT: f64 = 2.0;

const FIL_LOW_ALIGNMENT: f64 = 0.5;
const FIL_LOW_WEIGHT: f64 = 50.0;
const FIL_HIGH_ALIGNMENT: f64 = 0.7;
const FIL_HIGH_WEIGHT: f64 = 20.0;

/// Observational inputs. Every field is optional; a term whose inputs are
/// missing contributes zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GoeData {
    /// Reference (NET) axis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub axis_ref: Option<[f64; 3]>,
    /// Low-multipole CMB anomaly axis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmb_axis: Option<[f64; 3]>,
    /// Pulsar-timing source directions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pta_dirs: Option<Vec<[f64; 3]>>,
    /// Measured GW helicity, one per PTA direction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pta_helicity: Option<Vec<f64>>,
    /// High-redshift SMBH masses (solar masses).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bh_mass: Option<Vec<f64>>,
    /// Redshifts matching `bh_mass`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bh_z: Option<Vec<f64>>,
    /// Cosmic filament directions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fil_dirs: Option<Vec<[f64; 3]>>,
}

fn unit_vector(v: [f64; 3], what: &str) -> Result<[f64; 3]> {
    if v.iter().any(|x| !x.is_finite()) {
        return Err(Error::Validation(format!("{} contains non-finite components: {:?}", what, v)));
    }
    let norm = dot(&v, &v).sqrt();
    if norm == 0.0 {
        return Err(Error::Validation(format!("{} is a zero vector", what)));
    }
    Ok([v[0] / norm, v[1] / norm, v[2] / norm])
}

fn check_finite(values: &[f64], what: &str) -> Result<()> {
    if let Some(i) = values.iter().position(|x| !x.is_finite()) {
        return Err(Error::Validation(format!("{}[{}] is not finite", what, i)));
    }
    Ok(())
}

#[inline]
fn dot(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// `sign` with `sign(0) = 0`.
#[inline]
fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

fn random_direction(rng: &mut StdRng) -> [f64; 3] {
    loop {
        let v: [f64; 3] = [rng.sample(StandardNormal), rng.sample(StandardNormal), rng.sample(StandardNormal)];
        let norm = dot(&v, &v).sqrt();
        if norm > 0.0 {
            return [v[0] / norm, v[1] / norm, v[2] / norm];
        }
    }
}

impl GoeData {
    /// Parse JSON and normalise.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let data: Self = serde_json::from_str(json)?;
        data.normalized()
    }

    /// Read a JSON file and normalise.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Validate and return a copy with every direction scaled to unit length.
    ///
    /// Errors on zero or non-finite vectors, non-positive masses and length
    /// mismatches between paired arrays. Idempotent.
    pub fn normalized(mut self) -> Result<Self> {
        if let Some(axis) = self.axis_ref {
            self.axis_ref = Some(unit_vector(axis, "axis_ref")?);
        }
        if let Some(axis) = self.cmb_axis {
            self.cmb_axis = Some(unit_vector(axis, "cmb_axis")?);
        }
        if let Some(dirs) = self.pta_dirs.as_mut() {
            for (i, d) in dirs.iter_mut().enumerate() {
                *d = unit_vector(*d, &format!("pta_dirs[{}]", i))?;
            }
        }
        if let Some(dirs) = self.fil_dirs.as_mut() {
            for (i, d) in dirs.iter_mut().enumerate() {
                *d = unit_vector(*d, &format!("fil_dirs[{}]", i))?;
            }
        }
        if let Some(h) = &self.pta_helicity {
            check_finite(h, "pta_helicity")?;
        }
        if let (Some(dirs), Some(h)) = (&self.pta_dirs, &self.pta_helicity) {
            if dirs.len() != h.len() {
                return Err(Error::Validation(format!(
                    "pta_dirs has {} rows but pta_helicity has {} values",
                    dirs.len(),
                    h.len()
                )));
            }
        }
        if let Some(m) = &self.bh_mass {
            if let Some(i) = m.iter().position(|&x| !(x.is_finite() && x > 0.0)) {
                return Err(Error::Validation(format!(
                    "bh_mass[{}] must be finite and > 0, got {}",
                    i, m[i]
                )));
            }
        }
        if let Some(z) = &self.bh_z {
            check_finite(z, "bh_z")?;
        }
        if let (Some(m), Some(z)) = (&self.bh_mass, &self.bh_z) {
            if m.len() != z.len() {
                return Err(Error::Validation(format!(
                    "bh_mass has {} values but bh_z has {}",
                    m.len(),
                    z.len()
                )));
            }
        }
        Ok(self)
    }

    /// The dataset of the production run: fixed axes and SMBH catalogue,
    /// 24 random PTA directions with `0.05 N(0,1)` helicities and 12 random
    /// filament directions drawn from `seed`.
    pub fn synthetic(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let pta_dirs: Vec<[f64; 3]> = (0..24).map(|_| random_direction(&mut rng)).collect();
        let pta_helicity: Vec<f64> =
            (0..24).map(|_| PTA_SIGMA * rng.sample::<f64, _>(StandardNormal)).collect();
        let fil_dirs: Vec<[f64; 3]> = (0..12).map(|_| random_direction(&mut rng)).collect();

        let norm = |v: [f64; 3]| {
            let n = dot(&v, &v).sqrt();
            [v[0] / n, v[1] / n, v[2] / n]
        };

        Self {
            axis_ref: Some(norm([0.3, -0.7, 0.64])),
            cmb_axis: Some(norm([0.28, -0.73, 0.62])),
            pta_dirs: Some(pta_dirs),
            pta_helicity: Some(pta_helicity),
            bh_mass: Some(vec![1.2e8, 8e7, 4e7, 2e8, 9e7, 6e7, 1.5e8, 7e7, 5e7, 1.1e8]),
            bh_z: Some(vec![8.5, 9.1, 10.2, 8.9, 9.7, 11.0, 10.5, 9.3, 9.8, 10.7]),
            fil_dirs: Some(fil_dirs),
        }
    }
}

/// PTA helicity term reduced to per-source signs.
#[derive(Debug, Clone)]
struct PtaTerm {
    helicity: Vec<f64>,
    signs: Vec<f64>,
}

/// SMBH term reduced to log10 masses and the high-z fraction.
#[derive(Debug, Clone)]
struct SmbhTerm {
    log10_mass: Vec<f64>,
    highz_frac: f64,
}

/// Per-term breakdown of the constrained log density.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GoeTerms {
    /// Soft penalty on `a_min`.
    pub penalty_a_min: f64,
    /// Soft penalty on `rho_crit_NET`.
    pub penalty_rho_crit: f64,
    /// CMB axis alignment.
    pub cmb: f64,
    /// PTA helicity.
    pub pta: f64,
    /// SMBH masses and high-z bonus.
    pub smbh: f64,
    /// Filament alignment.
    pub filaments: f64,
}

impl GoeTerms {
    /// Sum of all terms (the uniform prior contributes 0 inside the support).
    pub fn total(&self) -> f64 {
        self.penalty_a_min + self.penalty_rho_crit + self.cmb + self.pta + self.smbh + self.filaments
    }
}

/// The GoE log-posterior with data reductions precomputed.
#[derive(Debug, Clone)]
pub struct GoeModel {
    data: GoeData,
    cmb_cos: Option<f64>,
    pta: Option<PtaTerm>,
    smbh: Option<SmbhTerm>,
    fil_mean_proj: Option<f64>,
}

impl GoeModel {
    /// Build the model. `data` is normalised (and validated) here.
    pub fn new(data: GoeData) -> Result<Self> {
        let data = data.normalized()?;
        let axis = data.axis_ref;

        let cmb_cos = match (data.cmb_axis, axis) {
            (Some(c), Some(a)) => Some(dot(&c, &a)),
            _ => None,
        };

        let pta = match (&data.pta_dirs, &data.pta_helicity, axis) {
            (Some(dirs), Some(h), Some(a)) => Some(PtaTerm {
                helicity: h.clone(),
                signs: dirs.iter().map(|d| sign(dot(d, &a))).collect(),
            }),
            _ => None,
        };

        let smbh = match (&data.bh_mass, &data.bh_z) {
            (Some(m), Some(z)) if !m.is_empty() => Some(SmbhTerm {
                log10_mass: m.iter().map(|x| x.log10()).collect(),
                highz_frac: z.iter().filter(|&&zi| zi > BH_HIGHZ_CUT).count() as f64 / z.len() as f64,
            }),
            _ => None,
        };

        let fil_mean_proj = match (&data.fil_dirs, axis) {
            (Some(dirs), Some(a)) if !dirs.is_empty() => {
                Some(dirs.iter().map(|d| dot(d, &a).abs()).sum::<f64>() / dirs.len() as f64)
            }
            _ => None,
        };

        Ok(Self { data, cmb_cos, pta, smbh, fil_mean_proj })
    }

    /// Normalised data the model was built from.
    pub fn data(&self) -> &GoeData {
        &self.data
    }

    fn check_dim(&self, params: &[f64]) -> Result<()> {
        if params.len() != PARAMETER_NAMES.len() {
            return Err(Error::Validation(format!(
                "expected {} parameters, got {}",
                PARAMETER_NAMES.len(),
                params.len()
            )));
        }
        Ok(())
    }

    /// Whether `params` lies inside the (closed) support.
    pub fn in_support(params: &[f64]) -> bool {
        params.len() == PARAMETER_BOUNDS.len()
            && params.iter().zip(PARAMETER_BOUNDS.iter()).all(|(&x, &(lo, hi))| x >= lo && x <= hi)
    }

    /// Term breakdown at `params`; `None` outside the support.
    pub fn terms(&self, params: &[f64]) -> Option<GoeTerms> {
        if !Self::in_support(params) {
            return None;
        }
        let h = params[H_SIGMA];
        let log10_rho = params[RHO_CRIT].log10();
        let log10_a = params[A_MIN].log10();
        let log10_m = params[M_SEED].log10();
        let log10_f = params[F_NET].log10();

        let pa = (log10_a - A_MIN_LOG10_CENTER) / PENALTY_WIDTH;
        let pr = (log10_rho - RHO_CRIT_LOG10_CENTER) / PENALTY_WIDTH;

        let mut terms =
            GoeTerms { penalty_a_min: -0.5 * pa * pa, penalty_rho_crit: -0.5 * pr * pr, ..Default::default() };

        if let Some(c) = self.cmb_cos {
            let r = 1.0 - c * h;
            terms.cmb = -(r * r);
        }
        if let Some(pta) = &self.pta {
            let chi2: f64 = pta
                .helicity
                .iter()
                .zip(&pta.signs)
                .map(|(&hi, &si)| {
                    let r = hi - h * si;
                    r * r
                })
                .sum::<f64>()
                / (PTA_SIGMA * PTA_SIGMA);
            terms.pta = -0.5 * chi2;
        }
        if let Some(bh) = &self.smbh {
            let target = log10_m + log10_f;
            let chi2: f64 = bh.log10_mass.iter().map(|&o| (o - target) * (o - target)).sum::<f64>()
                / (BH_SIGMA_DEX * BH_SIGMA_DEX);
            let bonus = BH_BONUS_WEIGHT * bh.highz_frac * (log10_m - BH_BONUS_MASS.log10()).max(0.0);
            terms.smbh = -0.5 * chi2 + bonus;
        }
        if let Some(p) = self.fil_mean_proj {
            terms.filaments = -(FIL_LOW_ALIGNMENT - p).max(0.0) * (1.0 - h) * FIL_LOW_WEIGHT
                + FIL_HIGH_WEIGHT * (p - FIL_HIGH_ALIGNMENT).max(0.0);
        }
        Some(terms)
    }

    /// Constrained log density `log p(data, params)` without Jacobian.
    ///
    /// `-inf` outside the support or whenever the total is non-finite.
    pub fn log_prob(&self, params: &[f64]) -> f64 {
        match self.terms(params) {
            Some(t) => {
                let total = t.total();
                if total.is_finite() { total } else { f64::NEG_INFINITY }
            }
            None => f64::NEG_INFINITY,
        }
    }

    /// Analytic gradient of [`Self::log_prob`] w.r.t. constrained parameters.
    ///
    /// Piecewise terms (`max(0, .)`) use the derivative of the active branch.
    pub fn grad_log_prob(&self, params: &[f64]) -> Result<Vec<f64>> {
        self.check_dim(params)?;
        let h = params[H_SIGMA];
        let rho = params[RHO_CRIT];
        let a = params[A_MIN];
        let m = params[M_SEED];
        let f = params[F_NET];

        let mut g = vec![0.0; PARAMETER_NAMES.len()];

        let penalty_grad = |x: f64, center: f64| {
            -(x.log10() - center) / (PENALTY_WIDTH * PENALTY_WIDTH) / (x * LN_10)
        };
        g[A_MIN] = penalty_grad(a, A_MIN_LOG10_CENTER);
        g[RHO_CRIT] = penalty_grad(rho, RHO_CRIT_LOG10_CENTER);

        if let Some(c) = self.cmb_cos {
            g[H_SIGMA] += 2.0 * c * (1.0 - c * h);
        }
        if let Some(pta) = &self.pta {
            g[H_SIGMA] += pta
                .helicity
                .iter()
                .zip(&pta.signs)
                .map(|(&hi, &si)| (hi - h * si) * si)
                .sum::<f64>()
                / (PTA_SIGMA * PTA_SIGMA);
        }
        if let Some(bh) = &self.smbh {
            let target = m.log10() + f.log10();
            // d/d(target) of -0.5 chi2
            let d_target: f64 = bh.log10_mass.iter().map(|&o| o - target).sum::<f64>()
                / (BH_SIGMA_DEX * BH_SIGMA_DEX);
            g[M_SEED] += d_target / (m * LN_10);
            g[F_NET] += d_target / (f * LN_10);
            if m > BH_BONUS_MASS {
                g[M_SEED] += BH_BONUS_WEIGHT * bh.highz_frac / (m * LN_10);
            }
        }
        if let Some(p) = self.fil_mean_proj {
            g[H_SIGMA] += FIL_LOW_WEIGHT * (FIL_LOW_ALIGNMENT - p).max(0.0);
        }
        Ok(g)
    }
}

impl LogDensityModel for GoeModel {
    fn dim(&self) -> usize {
        PARAMETER_NAMES.len()
    }

    fn parameter_names(&self) -> Vec<String> {
        PARAMETER_NAMES.iter().map(|s| s.to_string()).collect()
    }

    fn parameter_bounds(&self) -> Vec<(f64, f64)> {
        PARAMETER_BOUNDS.to_vec()
    }

    fn parameter_scales(&self) -> Vec<ParameterScale> {
        PARAMETER_SCALES.to_vec()
    }

    /// Interval midpoints: arithmetic for linear parameters, geometric for log.
    fn parameter_init(&self) -> Vec<f64> {
        PARAMETER_BOUNDS
            .iter()
            .zip(PARAMETER_SCALES.iter())
            .map(|(&(lo, hi), scale)| match scale {
                ParameterScale::Linear => 0.5 * (lo + hi),
                ParameterScale::Log => (lo * hi).sqrt(),
            })
            .collect()
    }

    fn nll(&self, params: &[f64]) -> Result<f64> {
        self.check_dim(params)?;
        Ok(-self.log_prob(params))
    }

    fn grad_nll(&self, params: &[f64]) -> Result<Vec<f64>> {
        self.check_dim(params)?;
        if !Self::in_support(params) {
            return Err(Error::Computation(format!("gradient requested outside support: {:?}", params)));
        }
        Ok(self.grad_log_prob(params)?.into_iter().map(|g| -g).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use goe_prob::math::central_difference_grad;

    fn mid() -> Vec<f64> {
        vec![0.6, 2e-4, 3e-30, 2e5, 0.02]
    }

    #[test]
    fn test_prior_outside_support_is_neg_inf() {
        let model = GoeModel::new(GoeData::synthetic(1)).unwrap();
        let mut p = mid();
        p[0] = 1.5;
        assert_eq!(model.log_prob(&p), f64::NEG_INFINITY);
        assert_eq!(model.nll(&p).unwrap(), f64::INFINITY);
        let mut p = mid();
        p[3] = 10.0;
        assert!(model.terms(&p).is_none());
    }

    #[test]
    fn test_empty_data_leaves_only_penalties() {
        let model = GoeModel::new(GoeData::default()).unwrap();
        // Penalties vanish at their centres.
        let lp = model.log_prob(&[0.3, 1e-4, 1e-30, 1e5, 0.01]);
        assert!(lp.abs() < 1e-12, "lp={}", lp);
        // One decade off in a_min costs 0.5 * (1/0.5)^2 = 2.
        let lp = model.log_prob(&[0.3, 1e-4, 1e-29, 1e5, 0.01]);
        assert!((lp + 2.0).abs() < 1e-10, "lp={}", lp);
    }

    #[test]
    fn test_cmb_term() {
        let data = GoeData {
            axis_ref: Some([0.0, 0.0, 2.0]),
            cmb_axis: Some([0.0, 1.0, 1.0]),
            ..Default::default()
        };
        let model = GoeModel::new(data).unwrap();
        let c = std::f64::consts::FRAC_1_SQRT_2;
        let t = model.terms(&[0.4, 1e-4, 1e-30, 1e5, 0.01]).unwrap();
        assert!((t.cmb + (1.0 - c * 0.4).powi(2)).abs() < 1e-12);
        assert_eq!(t.pta, 0.0);
        assert_eq!(t.smbh, 0.0);
    }

    #[test]
    fn test_pta_sign_of_zero_projection_is_zero() {
        let data = GoeData {
            axis_ref: Some([1.0, 0.0, 0.0]),
            pta_dirs: Some(vec![[0.0, 1.0, 0.0], [1.0, 0.0, 0.0]]),
            pta_helicity: Some(vec![0.1, 0.2]),
            ..Default::default()
        };
        let model = GoeModel::new(data).unwrap();
        let h = 0.5;
        let t = model.terms(&[h, 1e-4, 1e-30, 1e5, 0.01]).unwrap();
        let expected = -0.5 * (0.1f64.powi(2) + (0.2 - h).powi(2)) / 0.0025;
        assert!((t.pta - expected).abs() < 1e-9, "pta={} expected={}", t.pta, expected);
    }

    #[test]
    fn test_smbh_term_and_bonus() {
        let data = GoeData {
            bh_mass: Some(vec![1e8, 1e9]),
            bh_z: Some(vec![8.0, 10.0]),
            ..Default::default()
        };
        let model = GoeModel::new(data).unwrap();
        // target = log10(1e6 * 0.01) = 4
        let t = model.terms(&[0.5, 1e-4, 1e-30, 1e6, 0.01]).unwrap();
        let chi2 = (16.0 + 25.0) / 0.09;
        let bonus = 2.0 * 0.5 * 1.0;
        assert!((t.smbh - (-0.5 * chi2 + bonus)).abs() < 1e-9, "smbh={}", t.smbh);

        // Same target with M_seed = 1e5, where the bonus vanishes.
        let t = model.terms(&[0.5, 1e-4, 1e-30, 1e5, 0.1]).unwrap();
        assert!((t.smbh + 0.5 * chi2).abs() < 1e-9, "smbh={}", t.smbh);
    }

    #[test]
    fn test_empty_smbh_arrays_contribute_zero() {
        let data = GoeData { bh_mass: Some(vec![]), bh_z: Some(vec![]), ..Default::default() };
        let model = GoeModel::new(data).unwrap();
        let t = model.terms(&mid()).unwrap();
        assert_eq!(t.smbh, 0.0);
        assert!(model.log_prob(&mid()).is_finite());
    }

    #[test]
    fn test_filament_branches() {
        let axis = [0.0, 0.0, 1.0];
        // Perpendicular filaments: p = 0, low-alignment penalty active.
        let perp = GoeData {
            axis_ref: Some(axis),
            fil_dirs: Some(vec![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]),
            ..Default::default()
        };
        let model = GoeModel::new(perp).unwrap();
        let t = model.terms(&[0.2, 1e-4, 1e-30, 1e5, 0.01]).unwrap();
        assert!((t.filaments + 0.5 * 0.8 * 50.0).abs() < 1e-12);

        // Parallel filaments: p = 1, bonus 20 * 0.3.
        let par = GoeData {
            axis_ref: Some(axis),
            fil_dirs: Some(vec![[0.0, 0.0, 1.0], [0.0, 0.0, -3.0]]),
            ..Default::default()
        };
        let model = GoeModel::new(par).unwrap();
        let t = model.terms(&[0.2, 1e-4, 1e-30, 1e5, 0.01]).unwrap();
        assert!((t.filaments - 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_analytic_gradient_matches_finite_difference() {
        let model = GoeModel::new(GoeData::synthetic(7)).unwrap();
        for p in [mid(), vec![0.9, 5e-3, 1e-31, 5e3, 0.08], vec![0.1, 3e-6, 5e-28, 8e6, 2e-4]] {
            let g = model.grad_log_prob(&p).unwrap();
            for i in 0..5 {
                // Relative step per parameter; log-scale parameters span decades.
                let h = p[i] * 1e-6;
                let g_fd = central_difference_grad(
                    |x: &[f64]| {
                        let mut q = p.clone();
                        q[i] = x[0];
                        model.log_prob(&q)
                    },
                    &[p[i]],
                    h,
                )[0];
                let scale = g[i].abs().max(g_fd.abs()).max(1e-12);
                assert!(
                    (g[i] - g_fd).abs() / scale < 1e-4,
                    "param {} at {:?}: analytic={} fd={}",
                    PARAMETER_NAMES[i],
                    p,
                    g[i],
                    g_fd
                );
            }
        }
    }

    #[test]
    fn test_nll_is_negative_log_prob() {
        let model = GoeModel::new(GoeData::synthetic(3)).unwrap();
        let p = mid();
        assert!((model.nll(&p).unwrap() + model.log_prob(&p)).abs() < 1e-12);
        let g = model.grad_nll(&p).unwrap();
        let glp = model.grad_log_prob(&p).unwrap();
        for (a, b) in g.iter().zip(glp.iter()) {
            assert_eq!(*a, -*b);
        }
        assert!(model.nll(&[0.5]).is_err());
        assert!(matches!(model.grad_log_prob(&[0.5]), Err(Error::Validation(_))));
        assert!(model.grad_log_prob(&[0.5; 6]).is_err());
    }

    #[test]
    fn test_normalization_and_validation() {
        let data = GoeData::from_json_str(r#"{"axis_ref": [0, 3, 4], "pta_dirs": [[2, 0, 0]], "pta_helicity": [0.01]}"#)
            .unwrap();
        assert_eq!(data.axis_ref, Some([0.0, 0.6, 0.8]));
        assert_eq!(data.pta_dirs.as_ref().unwrap()[0], [1.0, 0.0, 0.0]);

        assert!(GoeData::from_json_str(r#"{"axis_ref": [0, 0, 0]}"#).is_err());
        assert!(GoeData::from_json_str(r#"{"bh_mass": [1e8], "bh_z": [9.0, 10.0]}"#).is_err());
        assert!(GoeData::from_json_str(r#"{"bh_mass": [-1.0]}"#).is_err());
        assert!(GoeData::from_json_str(r#"{"pta_dirs": [[1, 0, 0]], "pta_helicity": []}"#).is_err());
        assert!(GoeData::from_json_str(r#"{"unknown_field": 1}"#).is_err());
    }

    #[test]
    fn test_synthetic_is_deterministic_and_normalised() {
        let a = GoeData::synthetic(2025);
        let b = GoeData::synthetic(2025);
        assert_eq!(a, b);
        assert_ne!(a, GoeData::synthetic(2026));
        assert_eq!(a.pta_dirs.as_ref().unwrap().len(), 24);
        assert_eq!(a.fil_dirs.as_ref().unwrap().len(), 12);
        for d in a.pta_dirs.as_ref().unwrap().iter().chain(a.fil_dirs.as_ref().unwrap()) {
            assert!((dot(d, d) - 1.0).abs() < 1e-12);
        }
        // Already normalised: normalising again is a no-op up to rounding.
        let again = a.clone().normalized().unwrap();
        let ax = again.axis_ref.unwrap();
        assert!((dot(&ax, &ax) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_parameter_init_inside_support() {
        let model = GoeModel::new(GoeData::synthetic(1)).unwrap();
        let init = model.parameter_init();
        assert!(GoeModel::in_support(&init));
        assert!((init[3] - 1e5).abs() / 1e5 < 1e-12);
        assert!(model.log_prob(&init).is_finite());
    }
}
