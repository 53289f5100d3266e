// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Project configuration file (`setmask.toml`) support.
//!
//! Stores the design files, delay defaults, clock timing, sampling
//! parameters and simulator commands of one analysis. Every field is
//! optional. CLI arguments always override config file values.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Deserialize;

use crate::bridge::SimulatorConfig;
use crate::fault::PulseModel;
use crate::netlist::OutputPorts;
use crate::sdf::SdfCorner;

pub const CONFIG_FILE_NAME: &str = "setmask.toml";

/// Configuration loaded from `setmask.toml`.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct SetmaskConfig {
    pub design: DesignConfig,
    pub delays: DelaysConfig,
    pub timing: TimingConfig,
    pub faults: FaultsConfig,
    pub simulator: SimulatorSection,
}

/// Design inputs shared by all subcommands.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct DesignConfig {
    /// Gate-level Verilog netlist path.
    pub netlist: Option<PathBuf>,
    /// Module to analyze. Inferred from the file if omitted.
    pub top_module: Option<String>,
    pub sdf: Option<PathBuf>,
    pub sdf_corner: Option<SdfCorner>,
    pub liberty: Option<PathBuf>,
    /// Port names that mark a cell's output. Built-in set if empty.
    pub output_ports: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct DelaysConfig {
    /// Delay of gates no other source covers, ps.
    pub default_ps: Option<u64>,
    /// Per-cell-type delays in ps. Take precedence over Liberty.
    pub cells: IndexMap<String, u64>,
}

/// Clock timing in nanoseconds.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct TimingConfig {
    pub clock_period_ns: Option<f64>,
    pub setup_time_ns: Option<f64>,
    pub hold_time_ns: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FaultsConfig {
    pub num_faults: Option<usize>,
    pub pulse_mean_ps: Option<f64>,
    pub pulse_std_dev_ps: Option<f64>,
    pub seed: Option<u64>,
}

/// External simulator invocation. Commands run in the current directory.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct SimulatorSection {
    /// Directory receiving fault records, net table and testbench.
    pub work_dir: Option<PathBuf>,
    pub compile: Vec<String>,
    pub run: Vec<String>,
    pub result_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError(pub String);

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "config error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

impl SetmaskConfig {
    /// Search the current directory and its parents for `setmask.toml`.
    ///
    /// Returns the parsed config with paths resolved, and its location.
    pub fn discover() -> Option<(Self, PathBuf)> {
        let cwd = std::env::current_dir().ok()?;
        let mut dir = cwd.as_path();
        loop {
            let candidate = dir.join(CONFIG_FILE_NAME);
            if candidate.exists() {
                match Self::load(&candidate) {
                    Ok(config) => return Some((config, candidate)),
                    Err(e) => {
                        clilog::warn!("found {} but failed to load it: {}", candidate.display(), e);
                        return None;
                    }
                }
            }
            dir = dir.parent()?;
        }
    }

    /// Load a config file and resolve its relative paths against its directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError(format!("failed to read {}: {}", path.display(), e)))?;
        let mut config: Self = toml::from_str(&content)
            .map_err(|e| ConfigError(format!("failed to parse {}: {}", path.display(), e)))?;
        config.resolve_paths(path.parent().unwrap_or(Path::new(".")));
        Ok(config)
    }

    /// Resolve relative paths against the config file's directory.
    pub fn resolve_paths(&mut self, config_dir: &Path) {
        resolve_opt_path(&mut self.design.netlist, config_dir);
        resolve_opt_path(&mut self.design.sdf, config_dir);
        resolve_opt_path(&mut self.design.liberty, config_dir);
        resolve_opt_path(&mut self.simulator.work_dir, config_dir);
        resolve_opt_path(&mut self.simulator.result_file, config_dir);
    }

    pub fn output_ports(&self) -> OutputPorts {
        if self.design.output_ports.is_empty() {
            OutputPorts::default()
        } else {
            OutputPorts::new(self.design.output_ports.iter().map(String::as_str))
        }
    }

    /// Pulse model with configured overrides over the defaults.
    pub fn pulse_model(&self) -> PulseModel {
        let default = PulseModel::default();
        PulseModel {
            mean_ps: self.faults.pulse_mean_ps.unwrap_or(default.mean_ps),
            std_dev_ps: self.faults.pulse_std_dev_ps.unwrap_or(default.std_dev_ps),
        }
    }

    /// Simulator settings. `work_dir` defaults to `build` and the result
    /// file to `tb_output.txt` inside it. A run command is required.
    pub fn simulator_config(&self) -> Result<SimulatorConfig, ConfigError> {
        if self.simulator.run.is_empty() {
            return Err(ConfigError("[simulator] run command is not set".to_string()));
        }
        let work_dir = self.simulator.work_dir.clone().unwrap_or_else(|| PathBuf::from("build"));
        let result_file = self
            .simulator
            .result_file
            .clone()
            .unwrap_or_else(|| work_dir.join("tb_output.txt"));
        Ok(SimulatorConfig {
            work_dir,
            compile: self.simulator.compile.clone(),
            run: self.simulator.run.clone(),
            result_file,
        })
    }
}

/// Resolve a relative path against a base directory. Absolute paths are unchanged.
fn resolve_opt_path(path: &mut Option<PathBuf>, base: &Path) {
    if let Some(ref mut p) = path {
        if p.is_relative() {
            *p = base.join(&*p);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config() {
        let config: SetmaskConfig = toml::from_str("").unwrap();
        assert!(config.design.netlist.is_none());
        assert!(config.delays.cells.is_empty());
        assert!(config.faults.num_faults.is_none());
        assert_eq!(config.pulse_model(), PulseModel::default());
        assert_eq!(config.output_ports(), OutputPorts::default());
        assert!(config.simulator_config().is_err());
    }

    #[test]
    fn test_full_config() {
        let toml_str = r#"
[design]
netlist = "full_adder.vg"
top_module = "full_adder"
sdf = "full_adder.sdf"
sdf_corner = "typ"
liberty = "cells.lib"
output_ports = ["Q", "QN"]

[delays]
default_ps = 2
[delays.cells]
xor2s1 = 40
and2s1 = 25

[timing]
clock_period_ns = 5.0
setup_time_ns = 0.1
hold_time_ns = 0.05

[faults]
num_faults = 5000
pulse_mean_ps = 60.0
seed = 1

[simulator]
work_dir = "build"
compile = ["vcs", "-sverilog", "{testbench}", "{dpi}", "{netlist}", "-o", "build/simv"]
run = ["build/simv"]
"#;
        let config: SetmaskConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.design.sdf_corner, Some(SdfCorner::Typ));
        assert_eq!(config.delays.default_ps, Some(2));
        let cells: Vec<_> = config.delays.cells.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        assert_eq!(cells, vec![("xor2s1", 40), ("and2s1", 25)]);
        assert_eq!(config.timing.hold_time_ns, Some(0.05));
        assert_eq!(config.faults.seed, Some(1));
        assert_eq!(config.pulse_model(), PulseModel { mean_ps: 60.0, std_dev_ps: 15.0 });
        assert!(config.output_ports().contains("QN"));
        assert!(!config.output_ports().contains("Y"));

        let sim = config.simulator_config().unwrap();
        assert_eq!(sim.compile.len(), 7);
        assert_eq!(sim.result_file, PathBuf::from("build/tb_output.txt"));
    }

    #[test]
    fn test_bad_corner_is_rejected() {
        assert!(toml::from_str::<SetmaskConfig>("[design]\nsdf_corner = \"fast\"\n").is_err());
    }

    #[test]
    fn test_load_resolves_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            "[design]\nnetlist = \"rtl/top.vg\"\nliberty = \"/pdk/cells.lib\"\n\n\
             [simulator]\nwork_dir = \"out\"\nrun = [\"simv\"]\n",
        )
        .unwrap();
        let config = SetmaskConfig::load(&path).unwrap();
        assert_eq!(config.design.netlist, Some(dir.path().join("rtl/top.vg")));
        assert_eq!(config.design.liberty, Some(PathBuf::from("/pdk/cells.lib")));
        let sim = config.simulator_config().unwrap();
        assert_eq!(sim.work_dir, dir.path().join("out"));
        assert_eq!(sim.result_file, dir.path().join("out/tb_output.txt"));

        std::fs::write(&path, "[faults]\nnum_faults = \"many\"\n").unwrap();
        assert!(SetmaskConfig::load(&path).is_err());
        assert!(SetmaskConfig::load(&dir.path().join("missing.toml")).is_err());
    }
}
