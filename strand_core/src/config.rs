//! Bus-segment configuration
//!
//! A deployment ships one [`BusProfile`]: an ordered set of segment
//! configurations with a designated default. Most deployments carry a
//! single configuration; multi-variant profiles exist so discovery can
//! fall back to an alternate topology when the primary fails
//! authentication.

use crate::error::{StrandError, StrandResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use strand_types::{NodeSignature, MAX_SLAVE_NODES};

/// Expected identity of one slave position in the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// Slave position, counted from the master outward (0-based).
    pub addr: u8,
    /// Expected vendor identity register value.
    pub vendor: u8,
    /// Expected product identity register value.
    pub product: u8,
    /// Expected silicon revision.
    pub version: u8,
}

impl NodeDescriptor {
    /// The signature this descriptor expects discovery to find.
    pub fn signature(&self) -> NodeSignature {
        NodeSignature::slave(self.addr, self.vendor, self.product, self.version)
    }
}

/// Configuration for one bus segment — plain data bag.
///
/// Field defaults match a small development segment; deployments load
/// profiles from TOML and override per field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentConfig {
    /// Human-readable configuration name (shows up in logs and traces).
    #[serde(default = "default_name")]
    pub name: String,

    /// Slave topology in discovery order.
    pub nodes: Vec<NodeDescriptor>,

    /// Retry budget for fault-triggered rediscovery.
    #[serde(default = "default_fault_retry_limit")]
    pub fault_retry_limit: u32,

    /// Delay between a fault and the next rediscovery attempt.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Enable line diagnostics (periodic error-counter reset).
    #[serde(default)]
    pub line_diagnostics: bool,

    /// Run the bus-drop identity scan every N monitor ticks (0 disables).
    #[serde(default = "default_drop_check_interval")]
    pub drop_check_interval: u32,

    /// Period of the error-counter reset timer when diagnostics are on.
    #[serde(default = "default_error_reset_interval_ms")]
    pub error_reset_interval_ms: u64,
}

fn default_name() -> String {
    "segment".to_string()
}

fn default_fault_retry_limit() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    100
}

fn default_drop_check_interval() -> u32 {
    16
}

fn default_error_reset_interval_ms() -> u64 {
    1000
}

impl SegmentConfig {
    /// A named configuration for the given topology, everything else
    /// at defaults.
    pub fn new<S: Into<String>>(name: S, nodes: Vec<NodeDescriptor>) -> Self {
        Self {
            name: name.into(),
            nodes,
            fault_retry_limit: default_fault_retry_limit(),
            retry_delay_ms: default_retry_delay_ms(),
            line_diagnostics: false,
            drop_check_interval: default_drop_check_interval(),
            error_reset_interval_ms: default_error_reset_interval_ms(),
        }
    }

    /// Number of slave positions this configuration expects.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn validate(&self, index: usize) -> StrandResult<()> {
        if self.nodes.is_empty() {
            return Err(StrandError::config(format!(
                "configuration {} ('{}') has no nodes",
                index, self.name
            )));
        }
        if self.nodes.len() > MAX_SLAVE_NODES {
            return Err(StrandError::config(format!(
                "configuration {} ('{}') has {} nodes, segment maximum is {}",
                index,
                self.name,
                self.nodes.len(),
                MAX_SLAVE_NODES
            )));
        }
        for (pos, node) in self.nodes.iter().enumerate() {
            if node.addr as usize != pos {
                return Err(StrandError::config(format!(
                    "configuration {} ('{}'): node at position {} declares addr {}",
                    index, self.name, pos, node.addr
                )));
            }
        }
        Ok(())
    }
}

/// Ordered fallback configuration set with a designated default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusProfile {
    /// Index of the configuration tried first (and forced last on
    /// retry exhaustion).
    #[serde(default)]
    pub default_index: usize,

    /// Ordered configuration variants. At least one.
    pub configs: Vec<SegmentConfig>,
}

impl BusProfile {
    /// Profile with a single configuration (no fallbacks).
    pub fn single(config: SegmentConfig) -> Self {
        Self {
            default_index: 0,
            configs: vec![config],
        }
    }

    /// Parse and validate a profile from TOML text.
    pub fn from_toml_str(text: &str) -> StrandResult<Self> {
        let profile: BusProfile = toml::from_str(text)?;
        profile.validate()?;
        Ok(profile)
    }

    /// Load and validate a profile from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> StrandResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Validate cross-field invariants.
    pub fn validate(&self) -> StrandResult<()> {
        if self.configs.is_empty() {
            return Err(StrandError::config("profile has no configurations"));
        }
        if self.default_index >= self.configs.len() {
            return Err(StrandError::config(format!(
                "default_index {} out of range ({} configurations)",
                self.default_index,
                self.configs.len()
            )));
        }
        for (index, config) in self.configs.iter().enumerate() {
            config.validate(index)?;
        }
        Ok(())
    }

    /// Number of configuration variants.
    pub fn len(&self) -> usize {
        self.configs.len()
    }

    /// Whether the profile is empty (never true after validation).
    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    /// The configuration at `index`, clamped into range.
    pub fn config(&self, index: usize) -> &SegmentConfig {
        &self.configs[index.min(self.configs.len() - 1)]
    }

    /// Whether a fallback set exists (more than one configuration).
    pub fn has_fallbacks(&self) -> bool {
        self.configs.len() > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_node_config(name: &str) -> SegmentConfig {
        SegmentConfig::new(
            name,
            vec![
                NodeDescriptor {
                    addr: 0,
                    vendor: 0xAD,
                    product: 0x28,
                    version: 1,
                },
                NodeDescriptor {
                    addr: 1,
                    vendor: 0xAD,
                    product: 0x28,
                    version: 1,
                },
            ],
        )
    }

    #[test]
    fn single_profile_validates() {
        let profile = BusProfile::single(two_node_config("primary"));
        assert!(profile.validate().is_ok());
        assert!(!profile.has_fallbacks());
        assert_eq!(profile.config(0).node_count(), 2);
    }

    #[test]
    fn default_index_out_of_range_rejected() {
        let mut profile = BusProfile::single(two_node_config("primary"));
        profile.default_index = 5;
        assert!(matches!(
            profile.validate(),
            Err(StrandError::Config(_))
        ));
    }

    #[test]
    fn misnumbered_nodes_rejected() {
        let mut config = two_node_config("primary");
        config.nodes[1].addr = 7;
        let profile = BusProfile::single(config);
        let err = profile.validate().unwrap_err();
        assert!(err.to_string().contains("declares addr 7"));
    }

    #[test]
    fn toml_round_trip() {
        let text = r#"
default_index = 1

[[configs]]
name = "amp-only"
fault_retry_limit = 2
retry_delay_ms = 250
line_diagnostics = true

[[configs.nodes]]
addr = 0
vendor = 0xAD
product = 0x28
version = 1

[[configs]]
name = "full-cabin"

[[configs.nodes]]
addr = 0
vendor = 0xAD
product = 0x29
version = 2

[[configs.nodes]]
addr = 1
vendor = 0xAD
product = 0x29
version = 2
"#;
        let profile = BusProfile::from_toml_str(text).unwrap();
        assert_eq!(profile.len(), 2);
        assert_eq!(profile.default_index, 1);
        assert_eq!(profile.configs[0].fault_retry_limit, 2);
        assert!(profile.configs[0].line_diagnostics);
        // defaults fill unspecified fields
        assert_eq!(profile.configs[1].retry_delay_ms, 100);
        assert_eq!(profile.configs[1].node_count(), 2);
    }

    #[test]
    fn bad_toml_is_a_config_error() {
        let err = BusProfile::from_toml_str("configs = 3").unwrap_err();
        assert!(matches!(err, StrandError::Config(_)));
    }
}
