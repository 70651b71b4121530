//! TOML network descriptions
//!
//! A network file has an optional `[kernel]` table (any [`KernelConfig`]
//! field), one `[[unit]]` table per group of identical units and one
//! `[[connection]]` table per connection:
//!
//! ```toml
//! [kernel]
//! resolution_ms = 0.1
//! workers = 2
//!
//! [[unit]]
//! model = "iaf_psc_exp"
//! count = 2
//! i_e = 400.0
//!
//! [[connection]]
//! source = 0
//! target = 1
//! weight = 50.0
//! delay_steps = 10
//! rule = { rule = "stdp", lambda = 0.05 }
//! ```
//!
//! Unit ids are assigned in file order, counting every member of a group.

use anyhow::Context;
use pulse_runtime::{ConnectionDescriptor, KernelConfig, NetworkBuilder, UnitDescriptor};
use serde::Deserialize;
use std::path::Path;

use crate::error::{CliError, CliResult};

/// Parsed network file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkFile {
    /// Kernel configuration; omitted fields keep their defaults
    #[serde(default)]
    pub kernel: KernelConfig,
    /// Unit groups in id order
    #[serde(default, rename = "unit")]
    pub units: Vec<UnitGroup>,
    /// Connections in id order
    #[serde(default, rename = "connection")]
    pub connections: Vec<ConnectionDescriptor>,
}

/// `count` copies of one unit description
#[derive(Debug, Clone, Deserialize)]
pub struct UnitGroup {
    /// Number of units in the group
    #[serde(default = "default_count")]
    pub count: usize,
    /// Model, parameters and initial state shared by the group
    #[serde(flatten)]
    pub unit: UnitDescriptor,
}

fn default_count() -> usize {
    1
}

impl NetworkFile {
    /// Read and parse a network file
    pub fn load(path: &Path) -> CliResult<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read network file {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse a network description
    pub fn parse(content: &str) -> CliResult<Self> {
        let file: Self = toml::from_str(content)?;
        if file.units.is_empty() {
            return Err(CliError::config("network has no [[unit]] tables"));
        }
        if let Some(index) = file.units.iter().position(|group| group.count == 0) {
            return Err(CliError::config(format!(
                "[[unit]] table {} has count = 0",
                index + 1
            )));
        }
        Ok(file)
    }

    /// Total number of units over all groups
    pub fn num_units(&self) -> usize {
        self.units.iter().map(|group| group.count).sum()
    }

    /// Network builder holding every unit and connection of the file
    pub fn builder(&self) -> NetworkBuilder {
        let mut net = NetworkBuilder::new();
        for group in &self.units {
            net.add_units(group.count, group.unit.clone());
        }
        for connection in &self.connections {
            net.connect(connection.clone());
        }
        net
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_runtime::{model::ModelParams, Receptor, StdpParams, SynapseSpec, UnitId};

    const NETWORK: &str = r#"
        [kernel]
        workers = 2
        seed = 9

        [[unit]]
        model = "iaf_psc_exp"
        count = 3
        i_e = 400.0

        [[unit]]
        model = "hill_tononi"
        initial_state = { V_m = -60.0 }

        [[connection]]
        source = 0
        target = 3
        weight = 1.5
        delay_steps = 10
        receptor = "ampa"

        [[connection]]
        source = 1
        target = 2
        weight = 40.0
        delay_steps = 15
        rule = { rule = "stdp", lambda = 0.05 }
    "#;

    #[test]
    fn test_parse_network_file() {
        let file = NetworkFile::parse(NETWORK).unwrap();
        assert_eq!(file.kernel.workers, 2);
        assert_eq!(file.kernel.seed, 9);
        assert_eq!(file.kernel.resolution_ms, KernelConfig::default().resolution_ms);
        assert_eq!(file.num_units(), 4);

        match &file.units[0].unit.params {
            ModelParams::IafPscExp(params) => assert_eq!(params.i_e, 400.0),
            other => panic!("unexpected model {other:?}"),
        }
        assert_eq!(file.units[1].count, 1);
        assert_eq!(file.units[1].unit.initial_state["V_m"], -60.0);

        assert_eq!(file.connections[0].receptor, Receptor::Ampa);
        assert_eq!(file.connections[0].target, UnitId::new(3));
        match file.connections[1].rule {
            SynapseSpec::Stdp(StdpParams { lambda, .. }) => assert_eq!(lambda, 0.05),
            ref other => panic!("unexpected rule {other:?}"),
        }
    }

    #[test]
    fn test_builder_matches_file() {
        let file = NetworkFile::parse(NETWORK).unwrap();
        let net = file.builder();
        assert_eq!(net.num_units(), 4);
        assert_eq!(net.num_connections(), 2);
        let kernel = net.build(file.kernel.clone()).unwrap();
        assert_eq!(kernel.min_delay(), 10);
        assert_eq!(kernel.state(UnitId::new(3), "V_m").unwrap(), -60.0);
    }

    #[test]
    fn test_rejects_empty_and_malformed_files() {
        assert!(matches!(NetworkFile::parse(""), Err(CliError::Config(_))));
        assert!(matches!(
            NetworkFile::parse("[[unit]]\nmodel = \"iaf_psc_exp\"\ncount = 0\n"),
            Err(CliError::Config(_))
        ));
        assert!(matches!(
            NetworkFile::parse("[[unit]]\nmodel = \"no_such_model\"\n"),
            Err(CliError::Toml(_))
        ));
        assert!(matches!(
            NetworkFile::parse("[[unit]]\nmodel = \"iaf_psc_exp\"\n[simulation]\nsteps = 3\n"),
            Err(CliError::Toml(_))
        ));
    }
}
