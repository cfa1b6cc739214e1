//! Seeded pseudo-random streams over a small set of distributions.
//!
//! Every task that builds a stream from the same distribution and seed
//! replays the same sequence, which is what keeps shared-file layouts
//! consistent across processes without exchanging offset lists.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Geometric, Normal};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::comm::{Collective, MASTER_TASK};
use crate::error::{IoreError, Result};

pub const PARAM_MIN: &str = "min";
pub const PARAM_MAX: &str = "max";
pub const PARAM_MEAN: &str = "mean";
pub const PARAM_STDEV: &str = "stdev";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrngKind {
    Uniform,
    Normal,
    Geometric,
}

impl PrngKind {
    pub fn label(&self) -> &'static str {
        match self {
            PrngKind::Uniform => "unif",
            PrngKind::Normal => "norm",
            PrngKind::Geometric => "geom",
        }
    }

    fn required_params(&self) -> &'static [&'static str] {
        match self {
            PrngKind::Uniform => &[PARAM_MIN, PARAM_MAX],
            PrngKind::Normal => &[PARAM_MEAN, PARAM_STDEV],
            PrngKind::Geometric => &[PARAM_MEAN],
        }
    }
}

impl FromStr for PrngKind {
    type Err = IoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "unif" => Ok(PrngKind::Uniform),
            "norm" => Ok(PrngKind::Normal),
            "geom" => Ok(PrngKind::Geometric),
            _ => Err(IoreError::Prng(format!("unknown distribution '{s}'"))),
        }
    }
}

impl fmt::Display for PrngKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Declarative distribution: a kind plus string-valued parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct PrngDistribution {
    pub kind: PrngKind,
    pub params: BTreeMap<String, String>,
}

impl PrngDistribution {
    pub fn new(kind: PrngKind) -> Self {
        Self {
            kind,
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl ToString) -> Self {
        self.params.insert(key.to_string(), value.to_string());
        self
    }

    pub fn uniform(min: f64, max: f64) -> Self {
        Self::new(PrngKind::Uniform)
            .with_param(PARAM_MIN, min)
            .with_param(PARAM_MAX, max)
    }

    pub fn normal(mean: f64, stdev: f64) -> Self {
        Self::new(PrngKind::Normal)
            .with_param(PARAM_MEAN, mean)
            .with_param(PARAM_STDEV, stdev)
    }

    pub fn geometric(mean: f64) -> Self {
        Self::new(PrngKind::Geometric).with_param(PARAM_MEAN, mean)
    }

    /// Check that every required parameter is present and numeric.
    pub fn validate(&self) -> Result<()> {
        for key in self.kind.required_params() {
            self.param(key)?;
        }
        Ok(())
    }

    fn param(&self, key: &str) -> Result<f64> {
        let raw = self.params.get(key).ok_or_else(|| {
            IoreError::Prng(format!("{}: missing parameter '{key}'", self.kind))
        })?;
        let value = raw.trim();
        if value.is_empty() {
            return Err(IoreError::Prng(format!(
                "{}: empty parameter '{key}'",
                self.kind
            )));
        }
        value.parse::<f64>().map_err(|_| {
            IoreError::Prng(format!("{}: '{key}' is not a number: '{raw}'", self.kind))
        })
    }
}

impl fmt::Display for PrngDistribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {{", self.kind)?;
        for (i, (k, v)) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, " {k} = {v}")?;
        }
        f.write_str(" }")
    }
}

enum Sampler {
    Uniform { min: f64, span: f64 },
    Normal(Normal<f64>),
    Geometric(Geometric),
}

/// Stateful generator built from a [`PrngDistribution`] and a seed.
pub struct PrngStream {
    rng: Xoshiro256PlusPlus,
    sampler: Sampler,
}

impl PrngStream {
    pub fn new_seeded(dist: &PrngDistribution, seed: u32) -> Result<Self> {
        dist.validate()?;

        let sampler = match dist.kind {
            PrngKind::Uniform => {
                let min = dist.param(PARAM_MIN)?;
                let max = dist.param(PARAM_MAX)?;
                if min > max {
                    return Err(IoreError::Prng(format!(
                        "unif: min ({min}) greater than max ({max})"
                    )));
                }
                Sampler::Uniform {
                    min,
                    span: max - min,
                }
            }
            PrngKind::Normal => {
                let mean = dist.param(PARAM_MEAN)?;
                let stdev = dist.param(PARAM_STDEV)?;
                let normal = Normal::new(mean, stdev)
                    .map_err(|e| IoreError::Prng(format!("norm: {e}")))?;
                Sampler::Normal(normal)
            }
            PrngKind::Geometric => {
                let mean = dist.param(PARAM_MEAN)?;
                if mean.is_nan() || mean < 1.0 {
                    return Err(IoreError::Prng(format!(
                        "geom: mean must be at least 1, got {mean}"
                    )));
                }
                let geom = Geometric::new(1.0 / mean)
                    .map_err(|e| IoreError::Prng(format!("geom: {e}")))?;
                Sampler::Geometric(geom)
            }
        };

        Ok(Self {
            rng: Xoshiro256PlusPlus::seed_from_u64(u64::from(seed)),
            sampler,
        })
    }

    /// Stream seeded identically on every task of `comm`.
    pub fn new_sync(dist: &PrngDistribution, comm: &dyn Collective) -> Result<Self> {
        Self::new_seeded(dist, sync_seed(comm))
    }

    pub fn next_double(&mut self) -> f64 {
        match &self.sampler {
            Sampler::Uniform { min, span } => {
                let u: f64 = self.rng.r#gen();
                min + span * u
            }
            Sampler::Normal(normal) => normal.sample(&mut self.rng),
            Sampler::Geometric(geom) => geom.sample(&mut self.rng) as f64,
        }
    }

    /// Next value clamped into `[0, u32::MAX]`.
    pub fn next_uint(&mut self) -> u32 {
        let v = self.next_double();
        if v.is_nan() || v <= 0.0 {
            0
        } else if v >= u32::MAX as f64 {
            u32::MAX
        } else {
            v as u32
        }
    }

    /// Next value clamped into `[0, u64::MAX]`.
    pub fn next_size(&mut self) -> u64 {
        let v = self.next_double();
        if v.is_nan() || v <= 0.0 {
            0
        } else if v >= u64::MAX as f64 {
            u64::MAX
        } else {
            v as u64
        }
    }
}

/// Task-local seed from the microsecond part of the wall clock.
pub fn gen_seed() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_micros())
        .unwrap_or(0)
}

/// Seed sampled on the master task and broadcast to the whole group.
pub fn sync_seed(comm: &dyn Collective) -> u32 {
    let seed = if comm.is_master() { gen_seed() } else { 0 };
    comm.broadcast_u32(seed, MASTER_TASK)
}
