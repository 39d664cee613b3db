//! Distance-decay kernels.
//!
//! A kernel maps a non-negative distance to a weight. Distances are divided
//! by the kernel scale before the shape function is applied, and every weight
//! beyond the cutoff radius is exactly zero.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::error::ConfigurationError;
use super::geometric_utils::within_radius;

/// Named kernel shapes, evaluated on the scaled distance `x = d / sigma`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KernelPreset {
    /// `exp(-x^2 / 2)`
    Gaussian,
    /// `exp(-x)`
    Exponential,
    /// Constant weight of one inside the radius.
    Uniform,
    /// `(1 + x)^-exponent`
    InversePower {
        /// Decay exponent.
        exponent: f64,
    },
}

impl KernelPreset {
    fn eval(self, x: f64) -> f64 {
        match self {
            KernelPreset::Gaussian => (-0.5 * x * x).exp(),
            KernelPreset::Exponential => (-x).exp(),
            KernelPreset::Uniform => 1.0,
            KernelPreset::InversePower { exponent } => (1.0 + x).powf(-exponent),
        }
    }
}

/// User-supplied weight function of the scaled distance.
pub type CustomShape = Arc<dyn Fn(f64) -> f64 + Send + Sync>;

/// Shape of a kernel: a preset or an arbitrary function.
#[derive(Clone)]
pub enum KernelShape {
    /// One of the named shapes.
    Preset(KernelPreset),
    /// Arbitrary function of `d / sigma`.
    Custom(CustomShape),
}

impl fmt::Debug for KernelShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelShape::Preset(preset) => f.debug_tuple("Preset").field(preset).finish(),
            KernelShape::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// A truncated distance kernel with optional row normalisation.
#[derive(Debug, Clone)]
pub struct Kernel {
    shape: KernelShape,
    scale: f64,
    radius: f64,
    normalize: Option<f64>,
}

impl Kernel {
    /// Creates a kernel from a preset.
    ///
    /// # Arguments
    ///
    /// * `preset` - Shape of the weight function
    /// * `scale` - Distance scale `sigma`, must be positive
    /// * `radius` - Cutoff distance, must be positive
    pub fn new(preset: KernelPreset, scale: f64, radius: f64) -> Result<Self, ConfigurationError> {
        if let KernelPreset::InversePower { exponent } = preset {
            if !exponent.is_finite() {
                return Err(ConfigurationError::InvalidKernel {
                    name: "exponent",
                    value: exponent,
                });
            }
        }
        Self::with_shape(KernelShape::Preset(preset), scale, radius)
    }

    /// Gaussian kernel, `exp(-d^2 / (2 sigma^2))`.
    pub fn gaussian(scale: f64, radius: f64) -> Result<Self, ConfigurationError> {
        Self::new(KernelPreset::Gaussian, scale, radius)
    }

    /// Creates a kernel from an arbitrary function of the scaled distance.
    pub fn custom(
        shape: impl Fn(f64) -> f64 + Send + Sync + 'static,
        scale: f64,
        radius: f64,
    ) -> Result<Self, ConfigurationError> {
        Self::with_shape(KernelShape::Custom(Arc::new(shape)), scale, radius)
    }

    fn with_shape(shape: KernelShape, scale: f64, radius: f64) -> Result<Self, ConfigurationError> {
        if !(scale.is_finite() && scale > 0.0) {
            return Err(ConfigurationError::InvalidKernel {
                name: "scale",
                value: scale,
            });
        }
        if !(radius.is_finite() && radius > 0.0) {
            return Err(ConfigurationError::InvalidKernel {
                name: "radius",
                value: radius,
            });
        }
        Ok(Self {
            shape,
            scale,
            radius,
            normalize: None,
        })
    }

    /// Requests that every row of the induced operator sums to `target`.
    pub fn normalized(mut self, target: f64) -> Result<Self, ConfigurationError> {
        if !(target.is_finite() && target >= 0.0) {
            return Err(ConfigurationError::InvalidKernel {
                name: "normalize",
                value: target,
            });
        }
        self.normalize = Some(target);
        Ok(self)
    }

    /// Weight at `distance`; zero beyond the radius or for invalid outputs.
    pub fn weight(&self, distance: f64) -> f64 {
        if !within_radius(distance, self.radius) {
            return 0.0;
        }
        let x = distance / self.scale;
        let w = match &self.shape {
            KernelShape::Preset(preset) => preset.eval(x),
            KernelShape::Custom(f) => f(x),
        };
        if w.is_finite() && w > 0.0 { w } else { 0.0 }
    }

    /// Kernel shape.
    pub fn shape(&self) -> &KernelShape {
        &self.shape
    }

    /// Distance scale `sigma`.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Cutoff radius.
    pub fn radius(&self) -> f64 {
        self.radius
    }

    /// Row-sum target, if normalisation was requested.
    pub fn normalization(&self) -> Option<f64> {
        self.normalize
    }
}
