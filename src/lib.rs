// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! setmask: statistical single-event-transient masking analysis.
//!
//! setmask estimates how often a transient pulse on an internal wire of a
//! combinational gate-level netlist is masked before it can corrupt a
//! register. Timing masking is decided statically; the remaining faults are
//! handed to an external logic simulator.
//!
//! # Pipeline
//!
//! ```text
//! Verilog netlist
//!   → NetlistDB        (verilog: netlistdb loading, delay overrides)
//!   → Netlist          (netlist: wire/gate arena)
//!   → gate delays      (delay_model: instance / SDF / Liberty / default)
//!   → annotated graph  (annotate: distance and delay to the outputs)
//!   → FaultCampaign    (fault: sampled and classified against timing)
//!   → logic-masked     (bridge: external simulator via testbench)
//! ```
//!
//! # Key modules
//!
//! - [`verilog`]: gate-level Verilog loading through `netlistdb`
//! - [`netlist`]: wire/gate graph with structural warnings
//! - [`sdf`] / [`liberty`]: delay annotation sources
//! - [`delay_model`]: per-gate delay resolution
//! - [`annotate`]: backward output-distance and output-delay annotation
//! - [`timing`]: clock timing, safe window and per-pulse classification
//! - [`fault`]: fault sampling, counts and the fault mask ratio
//! - [`bridge`]: fault-record artifacts and the external simulator
//! - [`testbench`]: generated SystemVerilog fault-injection bench
//! - [`config`]: `setmask.toml` project configuration

pub mod verilog;

pub mod netlist;

pub mod sdf;

pub mod liberty;

pub mod delay_model;

pub mod annotate;

pub mod timing;

pub mod fault;

pub mod bridge;

pub mod testbench;

pub mod config;
