//! Demo race bootstrap parsed from the `race` section of the config
//! file.
//!
//! The binary seeds one race from this section the way a deployment's
//! API layer would: build the circuit, create the race, register a
//! grid of entries, start it.

use std::path::Path;

use serde::Deserialize;

use crate::error::BootError;

/// Parameters for the demo race seeded at startup.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RaceBootstrap {
    /// Race display name.
    #[serde(default = "default_name")]
    pub name: String,

    /// Laps to run.
    #[serde(default = "default_laps")]
    pub laps: u32,

    /// Number of cars on the grid.
    #[serde(default = "default_grid")]
    pub grid: u32,

    /// Lap length of the generated circuit, meters.
    #[serde(default = "default_track_length")]
    pub track_length: f64,

    /// Waypoints on the generated circuit.
    #[serde(default = "default_waypoints")]
    pub waypoints: u32,
}

impl Default for RaceBootstrap {
    fn default() -> Self {
        Self {
            name: default_name(),
            laps: default_laps(),
            grid: default_grid(),
            track_length: default_track_length(),
            waypoints: default_waypoints(),
        }
    }
}

impl RaceBootstrap {
    /// Read the `race` section from the YAML config file. A missing
    /// file or missing section yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`BootError::Bootstrap`] if the file exists but cannot
    /// be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, BootError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|e| BootError::Bootstrap {
            message: format!("failed to read config file: {e}"),
        })?;
        Self::parse(&contents)
    }

    /// Parse the `race` section out of a full YAML document.
    ///
    /// # Errors
    ///
    /// Returns [`BootError::Bootstrap`] on invalid YAML.
    pub fn parse(contents: &str) -> Result<Self, BootError> {
        let raw: serde_yml::Value =
            serde_yml::from_str(contents).map_err(|e| BootError::Bootstrap {
                message: format!("failed to parse config YAML: {e}"),
            })?;
        raw.get("race").map_or_else(
            || Ok(Self::default()),
            |section| {
                serde_yml::from_value(section.clone()).map_err(|e| BootError::Bootstrap {
                    message: format!("failed to parse race section: {e}"),
                })
            },
        )
    }
}

fn default_name() -> String {
    "Slipstream Grand Prix".to_owned()
}

const fn default_laps() -> u32 {
    3
}

const fn default_grid() -> u32 {
    4
}

const fn default_track_length() -> f64 {
    5000.0
}

const fn default_waypoints() -> u32 {
    12
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_section_yields_defaults() {
        let bootstrap = RaceBootstrap::parse("logging:\n  level: info\n");
        assert_eq!(bootstrap.ok(), Some(RaceBootstrap::default()));
    }

    #[test]
    fn race_section_is_parsed() {
        let yaml = "race:\n  name: \"Night Sprint\"\n  laps: 5\n  grid: 8\n";
        let bootstrap = RaceBootstrap::parse(yaml).ok().unwrap_or_default();
        assert_eq!(bootstrap.name, "Night Sprint");
        assert_eq!(bootstrap.laps, 5);
        assert_eq!(bootstrap.grid, 8);
        // Unspecified fields keep their defaults.
        assert!((bootstrap.track_length - 5000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn invalid_yaml_is_an_error() {
        assert!(RaceBootstrap::parse("race: [not: a map").is_err());
    }
}
