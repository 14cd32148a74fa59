//! Run configuration.
//!
//! [`TessConfig`] gathers every input the entry points consume. It can be
//! built in code through [`TessConfigBuilder`] or loaded from JSON; both paths
//! end in [`TessConfig::validate`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::geometry::kernel::KernelChoice;
use crate::geometry::point::Aabb;

/// Invalid or unreadable configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// `tot_blocks` is zero.
    #[error("Total block count must be at least 1")]
    ZeroBlocks,

    /// `max_blocks` is zero.
    #[error("Resident block limit must be at least 1")]
    ZeroResidentBlocks,

    /// `max_rounds` is zero.
    #[error("Round limit must be at least 1")]
    ZeroRounds,

    /// The margin would not grow between rounds.
    #[error("Margin growth must exceed 1, got {growth}")]
    InvalidGrowth {
        /// Configured growth
        growth: f64,
    },

    /// A margin parameter is non-positive or non-finite.
    #[error("Invalid margin parameter {name} = {value}")]
    InvalidMargin {
        /// Parameter name
        name: &'static str,
        /// Value
        value: f64,
    },

    /// Periodic boundaries and walls are mutually exclusive.
    #[error("Wraparound and walls cannot both be enabled")]
    WrapWithWalls,

    /// `min_volume > max_volume`.
    #[error("Volume filter is empty: min {min} > max {max}")]
    VolumeRange {
        /// Minimum volume
        min: f32,
        /// Maximum volume
        max: f32,
    },

    /// The domain box is empty, inverted, or non-finite.
    #[error("Degenerate domain: min {min:?} max {max:?}")]
    DegenerateDomain {
        /// Minimum corner
        min: [f64; 3],
        /// Maximum corner
        max: [f64; 3],
    },

    /// A particle grid dimension is zero.
    #[error("Particle grid must be non-empty, got {dsize:?}")]
    EmptyGrid {
        /// Grid size
        dsize: [usize; 3],
    },

    /// The configuration file could not be read or parsed.
    #[error("Cannot load configuration from {path}: {message}")]
    Load {
        /// File path (or `<string>`)
        path: String,
        /// Reason
        message: String,
    },

    /// A required builder field was not set.
    #[error("Configuration builder error: {message}")]
    Builder {
        /// Description
        message: String,
    },
}

impl From<derive_builder::UninitializedFieldError> for ConfigError {
    fn from(e: derive_builder::UninitializedFieldError) -> Self {
        Self::Builder {
            message: e.to_string(),
        }
    }
}

/// Persisted output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputLayout {
    /// One global dataset per field
    #[default]
    Columnar,
    /// One serialized record per block
    Blocks,
}

/// Run configuration.
///
/// # Examples
///
/// ```
/// use tess::core::config::TessConfigBuilder;
///
/// let config = TessConfigBuilder::default()
///     .tot_blocks(8)
///     .domain_size([8, 8, 8])
///     .wrap(true)
///     .build()
///     .unwrap();
/// assert_eq!(config.periodic(), [true; 3]);
/// ```
#[derive(Builder, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[builder(
    default,
    build_fn(name = "build_unchecked", private, error = "ConfigError")
)]
#[serde(default)]
pub struct TessConfig {
    /// Total number of blocks
    pub tot_blocks: usize,
    /// Blocks resident per process
    pub max_blocks: usize,
    /// Particle lattice size
    pub domain_size: [usize; 3],
    /// Domain minimum corner
    pub domain_min: [f64; 3],
    /// Domain maximum corner
    pub domain_max: [f64; 3],
    /// Particle jitter (absolute units)
    pub jitter: f64,
    /// Drop complete cells below this volume
    #[builder(setter(strip_option))]
    pub min_volume: Option<f32>,
    /// Drop complete cells above this volume
    #[builder(setter(strip_option))]
    pub max_volume: Option<f32>,
    /// Periodic boundaries on every axis
    pub wrap: bool,
    /// Mirror walls on every domain face
    pub walls: bool,
    /// Output path; no output when absent
    #[builder(setter(into, strip_option))]
    pub output: Option<PathBuf>,
    /// Output format
    pub output_layout: OutputLayout,
    /// Exchange round limit
    pub max_rounds: usize,
    /// Fixed initial ghost margin; density-derived when absent
    #[builder(setter(strip_option))]
    pub ghost_margin: Option<f64>,
    /// Initial margin as a multiple of the mean particle spacing
    pub margin_factor: f64,
    /// Margin multiplier per round
    pub margin_growth: f64,
    /// Geometry kernel
    pub kernel: KernelChoice,
    /// Particle generation seed
    pub seed: u64,
}

impl Default for TessConfig {
    fn default() -> Self {
        Self {
            tot_blocks: 8,
            max_blocks: usize::MAX,
            domain_size: [16; 3],
            domain_min: [0.0; 3],
            domain_max: [16.0; 3],
            jitter: 0.3,
            min_volume: None,
            max_volume: None,
            wrap: false,
            walls: false,
            output: None,
            output_layout: OutputLayout::Columnar,
            max_rounds: 8,
            ghost_margin: None,
            margin_factor: 2.0,
            margin_growth: 1.5,
            kernel: KernelChoice::default(),
            seed: 0,
        }
    }
}

impl TessConfigBuilder {
    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the result fails [`TessConfig::validate`].
    pub fn build(&self) -> Result<TessConfig, ConfigError> {
        let config = self.build_unchecked()?;
        config.validate()?;
        Ok(config)
    }
}

impl TessConfig {
    /// Checks the configuration for contradictions.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tot_blocks == 0 {
            return Err(ConfigError::ZeroBlocks);
        }
        if self.max_blocks == 0 {
            return Err(ConfigError::ZeroResidentBlocks);
        }
        if self.max_rounds == 0 {
            return Err(ConfigError::ZeroRounds);
        }
        if self.domain_size.contains(&0) {
            return Err(ConfigError::EmptyGrid {
                dsize: self.domain_size,
            });
        }
        if !(self.margin_growth > 1.0 && self.margin_growth.is_finite()) {
            return Err(ConfigError::InvalidGrowth {
                growth: self.margin_growth,
            });
        }
        if !(self.margin_factor > 0.0 && self.margin_factor.is_finite()) {
            return Err(ConfigError::InvalidMargin {
                name: "margin_factor",
                value: self.margin_factor,
            });
        }
        if let Some(m) = self.ghost_margin
            && !(m > 0.0 && m.is_finite())
        {
            return Err(ConfigError::InvalidMargin {
                name: "ghost_margin",
                value: m,
            });
        }
        if !(self.jitter >= 0.0 && self.jitter.is_finite()) {
            return Err(ConfigError::InvalidMargin {
                name: "jitter",
                value: self.jitter,
            });
        }
        if self.wrap && self.walls {
            return Err(ConfigError::WrapWithWalls);
        }
        if let (Some(min), Some(max)) = (self.min_volume, self.max_volume)
            && min > max
        {
            return Err(ConfigError::VolumeRange { min, max });
        }
        let domain = self.domain();
        if !(0..3).all(|a| {
            domain.min[a].is_finite() && domain.max[a].is_finite() && domain.min[a] < domain.max[a]
        }) {
            return Err(ConfigError::DegenerateDomain {
                min: self.domain_min,
                max: self.domain_max,
            });
        }
        Ok(())
    }

    /// The global domain box.
    #[must_use]
    pub const fn domain(&self) -> Aabb {
        Aabb::new(self.domain_min, self.domain_max)
    }

    /// Per-axis periodicity.
    #[must_use]
    pub const fn periodic(&self) -> [bool; 3] {
        [self.wrap; 3]
    }

    /// Whether a cell volume passes the filter.
    #[must_use]
    pub fn accepts_volume(&self, volume: f32) -> bool {
        self.min_volume.is_none_or(|min| volume >= min)
            && self.max_volume.is_none_or(|max| volume <= max)
    }

    /// Parses and validates JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] on malformed JSON or a validation error.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ConfigError::Load {
            path: "<string>".to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if the file cannot be read or parsed.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Load {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_json_str(&text).map_err(|e| match e {
            ConfigError::Load { message, .. } => ConfigError::Load {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    /// Serializes to pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if serialization fails.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Load {
            path: "<string>".to_string(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        TessConfig::default().validate().unwrap();
        let built = TessConfigBuilder::default().build().unwrap();
        assert_eq!(built, TessConfig::default());
    }

    #[test]
    fn builder_overrides_fields() {
        let config = TessConfigBuilder::default()
            .tot_blocks(27)
            .min_volume(0.5)
            .output("out.tess")
            .ghost_margin(1.25)
            .build()
            .unwrap();
        assert_eq!(config.tot_blocks, 27);
        assert_eq!(config.min_volume, Some(0.5));
        assert_eq!(config.output, Some(PathBuf::from("out.tess")));
        assert_eq!(config.ghost_margin, Some(1.25));
    }

    #[test]
    fn contradictions_are_rejected() {
        let cases = [
            (TessConfigBuilder::default().tot_blocks(0).build(), ConfigError::ZeroBlocks),
            (TessConfigBuilder::default().max_rounds(0).build(), ConfigError::ZeroRounds),
            (
                TessConfigBuilder::default().wrap(true).walls(true).build(),
                ConfigError::WrapWithWalls,
            ),
            (
                TessConfigBuilder::default().margin_growth(1.0).build(),
                ConfigError::InvalidGrowth { growth: 1.0 },
            ),
            (
                TessConfigBuilder::default()
                    .min_volume(2.0)
                    .max_volume(1.0)
                    .build(),
                ConfigError::VolumeRange { min: 2.0, max: 1.0 },
            ),
        ];
        for (result, expected) in cases {
            assert_eq!(result.unwrap_err(), expected);
        }
        let flat = TessConfigBuilder::default()
            .domain_max([16.0, 0.0, 16.0])
            .build();
        assert!(matches!(flat, Err(ConfigError::DegenerateDomain { .. })));
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config = TessConfig::from_json_str(
            r#"{"tot_blocks": 4, "wrap": true, "output_layout": "blocks",
                "kernel": {"type": "bowyer_watson", "spatial_sort": false}}"#,
        )
        .unwrap();
        assert_eq!(config.tot_blocks, 4);
        assert!(config.wrap);
        assert_eq!(config.output_layout, OutputLayout::Blocks);
        assert_eq!(config.max_rounds, TessConfig::default().max_rounds);
        let back = TessConfig::from_json_str(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn malformed_json_is_a_load_error() {
        assert!(matches!(
            TessConfig::from_json_str("{ not json"),
            Err(ConfigError::Load { .. })
        ));
        assert!(matches!(
            TessConfig::from_json_str(r#"{"tot_blocks": 0}"#),
            Err(ConfigError::ZeroBlocks)
        ));
    }

    #[test]
    fn volume_filter() {
        let config = TessConfigBuilder::default()
            .min_volume(1.0)
            .max_volume(2.0)
            .build()
            .unwrap();
        assert!(config.accepts_volume(1.5));
        assert!(!config.accepts_volume(0.5));
        assert!(!config.accepts_volume(2.5));
        assert!(TessConfig::default().accepts_volume(f32::MAX));
    }
}
