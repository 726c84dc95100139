//! The learned scalars of the filter.
//!
//! A [`ParameterVector`] is the only mutable state of a fit: it is owned by
//! the trainer, nudged by gradient steps, projected back onto its admissible
//! domain after every step, and read as plain values (or seeded dual numbers)
//! by the forward pass.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::autodiff::Dual;
use crate::error::{AoError, AoResult};
use crate::float_trait::AoFloat;

/// Number of learned parameters.
pub const NUM_PARAMS: usize = 5;

/// Initial variance of the depth-similarity Gaussian
const DEFAULT_DEPTH_VARIANCE: f64 = 0.04;

/// Initial variance of the spatial-distance Gaussian (in pixels^2)
const DEFAULT_SPATIAL_VARIANCE: f64 = 26.0;

/// Initial exponent applied to the local deviations
const DEFAULT_DEV_EXPONENT: f64 = 1.0;

/// Initial floor on the dark deviation
const DEFAULT_DARK_EPSILON: f64 = 0.01;

/// Initial bias of the blend towards bright
const DEFAULT_CONTRAST_ENHANCE: f64 = 1.0;

/// Default lower bound used when projecting parameters after a step.
pub const DEFAULT_PARAM_FLOOR: f64 = 1e-4;

/// Identifies one learned parameter; the discriminant is its gradient slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParamId {
    DepthVariance = 0,
    SpatialVariance = 1,
    DevExponent = 2,
    DarkEpsilon = 3,
    ContrastEnhance = 4,
}

impl ParamId {
    pub const ALL: [ParamId; NUM_PARAMS] = [
        ParamId::DepthVariance,
        ParamId::SpatialVariance,
        ParamId::DevExponent,
        ParamId::DarkEpsilon,
        ParamId::ContrastEnhance,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Name used in the persisted mapping.
    pub fn name(self) -> &'static str {
        match self {
            ParamId::DepthVariance => "depth_variance",
            ParamId::SpatialVariance => "spatial_variance",
            ParamId::DevExponent => "dev_exponent",
            ParamId::DarkEpsilon => "dark_epsilon",
            ParamId::ContrastEnhance => "contrast_enhance",
        }
    }

    pub fn from_name(name: &str) -> AoResult<Self> {
        ParamId::ALL
            .into_iter()
            .find(|id| id.name() == name)
            .ok_or_else(|| AoError::UnknownParameter(name.to_string()))
    }
}

/// Parameter values as seen by one forward pass, in the pass's scalar type.
#[derive(Debug, Clone, Copy)]
pub struct FilterParams<S: AoFloat> {
    pub depth_variance: S,
    pub spatial_variance: S,
    pub dev_exponent: S,
    pub dark_epsilon: S,
    pub contrast_enhance: S,
}

/// The learned, strictly positive filter parameters.
///
/// Serializes as a flat `name -> value` map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, f64>", into = "BTreeMap<String, f64>")]
pub struct ParameterVector {
    values: [f64; NUM_PARAMS],
}

impl Default for ParameterVector {
    fn default() -> Self {
        let mut values = [0.0; NUM_PARAMS];
        values[ParamId::DepthVariance.index()] = DEFAULT_DEPTH_VARIANCE;
        values[ParamId::SpatialVariance.index()] = DEFAULT_SPATIAL_VARIANCE;
        values[ParamId::DevExponent.index()] = DEFAULT_DEV_EXPONENT;
        values[ParamId::DarkEpsilon.index()] = DEFAULT_DARK_EPSILON;
        values[ParamId::ContrastEnhance.index()] = DEFAULT_CONTRAST_ENHANCE;
        Self { values }
    }
}

impl ParameterVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from raw values in [`ParamId`] order. Values must be finite and > 0.
    pub fn from_values(values: [f64; NUM_PARAMS]) -> AoResult<Self> {
        for id in ParamId::ALL {
            let v = values[id.index()];
            if !v.is_finite() || v <= 0.0 {
                return Err(AoError::InvalidConfig(format!(
                    "{} must be finite and > 0, got {}",
                    id.name(),
                    v
                )));
            }
        }
        Ok(Self { values })
    }

    #[inline]
    pub fn get(&self, id: ParamId) -> f64 {
        self.values[id.index()]
    }

    /// Overwrite one value. Only the trainer and drivers seeding a fit call this.
    pub fn set(&mut self, id: ParamId, value: f64) -> AoResult<()> {
        if !value.is_finite() || value <= 0.0 {
            return Err(AoError::InvalidConfig(format!(
                "{} must be finite and > 0, got {}",
                id.name(),
                value
            )));
        }
        self.values[id.index()] = value;
        Ok(())
    }

    #[inline]
    pub fn values(&self) -> &[f64; NUM_PARAMS] {
        &self.values
    }

    pub(crate) fn values_mut(&mut self) -> &mut [f64; NUM_PARAMS] {
        &mut self.values
    }

    /// Apply `projection` to every value, e.g. after a gradient step.
    pub fn project_with<P: Fn(ParamId, f64) -> f64>(&mut self, projection: P) {
        for id in ParamId::ALL {
            let idx = id.index();
            self.values[idx] = projection(id, self.values[idx]);
        }
    }

    /// Project onto the admissible domain: every value at least `floor`.
    pub fn project_positive(&mut self, floor: f64) {
        self.project_with(|_, v| clamp_positive(v, floor));
    }

    /// Values as constants of scalar type `S` (evaluation).
    pub fn as_filter_params<S: AoFloat>(&self) -> FilterParams<S> {
        FilterParams {
            depth_variance: S::from_f64_c(self.get(ParamId::DepthVariance)),
            spatial_variance: S::from_f64_c(self.get(ParamId::SpatialVariance)),
            dev_exponent: S::from_f64_c(self.get(ParamId::DevExponent)),
            dark_epsilon: S::from_f64_c(self.get(ParamId::DarkEpsilon)),
            contrast_enhance: S::from_f64_c(self.get(ParamId::ContrastEnhance)),
        }
    }

    /// Values as seeded dual variables, one gradient slot each (fitting).
    pub fn as_dual_params(&self) -> FilterParams<Dual> {
        let var = |id: ParamId| Dual::variable(self.get(id), id.index());
        FilterParams {
            depth_variance: var(ParamId::DepthVariance),
            spatial_variance: var(ParamId::SpatialVariance),
            dev_exponent: var(ParamId::DevExponent),
            dark_epsilon: var(ParamId::DarkEpsilon),
            contrast_enhance: var(ParamId::ContrastEnhance),
        }
    }

    pub fn to_map(&self) -> BTreeMap<String, f64> {
        ParamId::ALL
            .into_iter()
            .map(|id| (id.name().to_string(), self.get(id)))
            .collect()
    }

    /// Inverse of [`to_map`](Self::to_map). Every parameter must be present.
    pub fn from_map(map: &BTreeMap<String, f64>) -> AoResult<Self> {
        for name in map.keys() {
            ParamId::from_name(name)?;
        }
        let mut values = [0.0; NUM_PARAMS];
        for id in ParamId::ALL {
            values[id.index()] = *map
                .get(id.name())
                .ok_or_else(|| AoError::MissingParameter(id.name().to_string()))?;
        }
        Self::from_values(values)
    }

    pub fn to_json(&self) -> AoResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> AoResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

impl TryFrom<BTreeMap<String, f64>> for ParameterVector {
    type Error = AoError;

    fn try_from(map: BTreeMap<String, f64>) -> Result<Self, Self::Error> {
        ParameterVector::from_map(&map)
    }
}

impl From<ParameterVector> for BTreeMap<String, f64> {
    fn from(params: ParameterVector) -> Self {
        params.to_map()
    }
}

/// Default projection: NaN and anything below `floor` collapse to `floor`.
#[inline]
pub fn clamp_positive(value: f64, floor: f64) -> f64 {
    if value >= floor {
        value
    } else {
        floor
    }
}
