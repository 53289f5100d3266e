// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! SystemVerilog fault-injection testbench generation.
//!
//! The generated bench instantiates the design under its declared ports,
//! reads the net table and the fault-record file, and for every record with
//! both timing bits clear:
//!
//! - drives random primary inputs and lets the outputs settle
//! - captures the golden outputs
//! - forces the site net to its inverted value through the VPI helpers
//! - compares the outputs and releases the net
//!
//! A fault whose outputs match the golden values is logic-masked. The count
//! is written as one decimal integer to the result file. A site the
//! simulator cannot find stops the run with `$fatal` instead of being
//! counted.
//!
//! The DPI functions (`force_net_by_name_dpi`, `release_net_by_name_dpi`,
//! `get_net_value_by_name_dpi`) are implemented over VPI in [`DPI_HELPER`],
//! which is written next to the bench and compiled in by the simulator.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::netlist::Netlist;

/// Name of the generated top-level module.
pub const TB_MODULE: &str = "setmask_tb";
/// Instance name of the design under test inside the bench.
pub const DUT_INSTANCE: &str = "dut";

/// File name of the DPI helper source.
pub const DPI_HELPER_FILE: &str = "setmask_dpi.c";

/// C source of the net access functions imported by the bench. Every
/// function returns -1 when the hierarchical name does not resolve.
pub const DPI_HELPER: &str = r#"/* Net access for the setmask fault-injection testbench. */
#include <vpi_user.h>

static vpiHandle find_net(const char *name)
{
    vpiHandle net = vpi_handle_by_name((PLI_BYTE8 *)name, NULL);
    if (net == NULL)
        vpi_printf("setmask: no net %s\n", name);
    return net;
}

int force_net_by_name_dpi(const char *name, int value)
{
    s_vpi_value v;
    vpiHandle net = find_net(name);
    if (net == NULL)
        return -1;
    v.format = vpiIntVal;
    v.value.integer = value;
    vpi_put_value(net, &v, NULL, vpiForceFlag);
    return 0;
}

int release_net_by_name_dpi(const char *name)
{
    s_vpi_value v;
    vpiHandle net = find_net(name);
    if (net == NULL)
        return -1;
    v.format = vpiIntVal;
    vpi_put_value(net, &v, NULL, vpiReleaseFlag);
    return 0;
}

int get_net_value_by_name_dpi(const char *name)
{
    s_vpi_value v;
    vpiHandle net = find_net(name);
    if (net == NULL)
        return -1;
    v.format = vpiIntVal;
    vpi_get_value(net, &v);
    return v.value.integer;
}
"#;

const DPI_IMPORTS: &str = concat!(
    "  import \"DPI-C\" function int force_net_by_name_dpi(",
    "input string netname, input int value);\n",
    "  import \"DPI-C\" function int release_net_by_name_dpi(input string netname);\n",
    "  import \"DPI-C\" function int get_net_value_by_name_dpi(input string netname);\n",
);

/// Files and timing the generated bench refers to.
#[derive(Debug, Clone, PartialEq)]
pub struct TestbenchOptions {
    pub faults_file: PathBuf,
    pub nets_file: PathBuf,
    pub result_file: PathBuf,
    /// Settling time after each stimulus change, ps. One clock period.
    pub settle_ps: u64,
    /// Entries in the net table.
    pub num_sites: usize,
}

/// Quote a path as a SystemVerilog string literal.
fn sv_string(path: &Path) -> String {
    let mut s = String::from("\"");
    for c in path.display().to_string().chars() {
        match c {
            '"' => s.push_str("\\\""),
            '\\' => s.push_str("\\\\"),
            c => s.push(c),
        }
    }
    s.push('"');
    s
}

fn range(width: usize) -> String {
    if width > 1 {
        format!("[{}:0] ", width - 1)
    } else {
        String::new()
    }
}

/// A random value expression of at least `width` bits.
fn random_expr(width: usize) -> String {
    let words = width.div_ceil(32).max(1);
    if words == 1 {
        "$urandom".to_string()
    } else {
        format!("{{{}}}", vec!["$urandom"; words].join(", "))
    }
}

/// Generate the testbench source for `netlist`.
pub fn generate(netlist: &Netlist, options: &TestbenchOptions) -> String {
    let mut tb = String::new();
    // writes into a String cannot fail
    let _ = write_bench(&mut tb, netlist, options);
    tb
}

fn write_bench(tb: &mut String, netlist: &Netlist, o: &TestbenchOptions) -> std::fmt::Result {
    writeln!(
        tb,
        "// Fault-injection testbench for module {}, generated by setmask.",
        netlist.name
    )?;
    writeln!(tb, "`timescale 1ps/1ps")?;
    writeln!(tb)?;
    writeln!(tb, "module {};", TB_MODULE)?;
    tb.push_str(DPI_IMPORTS);
    writeln!(tb)?;

    for (name, width) in &netlist.inputs {
        writeln!(tb, "  reg {}{};", range(*width), name)?;
    }
    for (name, width) in &netlist.outputs {
        writeln!(tb, "  wire {}{};", range(*width), name)?;
        writeln!(tb, "  reg {}golden_{};", range(*width), name)?;
    }
    writeln!(tb)?;

    let ports: Vec<String> = netlist
        .inputs
        .iter()
        .chain(netlist.outputs.iter())
        .map(|(name, _)| format!(".{0}({0})", name))
        .collect();
    writeln!(tb, "  {} {} (", netlist.name, DUT_INSTANCE)?;
    writeln!(tb, "    {}", ports.join(",\n    "))?;
    writeln!(tb, "  );")?;
    writeln!(tb)?;

    writeln!(tb, "  localparam int NUM_SITES = {};", o.num_sites)?;
    writeln!(tb, "  localparam int SETTLE = {};", o.settle_ps)?;
    writeln!(tb, "  string nets [NUM_SITES];")?;
    writeln!(tb, "  string path;")?;
    writeln!(tb, "  int fd, site, timing_masked, metastable, value;")?;
    writeln!(tb, "  int simulated = 0;")?;
    writeln!(tb, "  int logic_masked = 0;")?;
    writeln!(tb)?;

    writeln!(tb, "  initial begin")?;
    writeln!(tb, "    fd = $fopen({}, \"r\");", sv_string(&o.nets_file))?;
    writeln!(tb, "    if (fd == 0) $fatal(1, \"cannot open net table\");")?;
    writeln!(tb, "    for (int i = 0; i < NUM_SITES; i++)")?;
    writeln!(tb, "      void'($fscanf(fd, \"%s\\n\", nets[i]));")?;
    writeln!(tb, "    $fclose(fd);")?;
    writeln!(tb)?;
    writeln!(tb, "    fd = $fopen({}, \"r\");", sv_string(&o.faults_file))?;
    writeln!(tb, "    if (fd == 0) $fatal(1, \"cannot open fault records\");")?;
    writeln!(
        tb,
        "    while ($fscanf(fd, \"%h %d %d\\n\", site, timing_masked, metastable) == 3) begin"
    )?;
    writeln!(tb, "      if (timing_masked == 0 && metastable == 0) begin")?;
    for (name, width) in &netlist.inputs {
        writeln!(tb, "        {} = {};", name, random_expr(*width))?;
    }
    writeln!(tb, "        #(SETTLE);")?;
    for (name, _) in &netlist.outputs {
        writeln!(tb, "        golden_{0} = {0};", name)?;
    }
    writeln!(tb, "        path = {{\"{}.{}.\", nets[site]}};", TB_MODULE, DUT_INSTANCE)?;
    writeln!(tb, "        value = get_net_value_by_name_dpi(path);")?;
    writeln!(tb, "        if (value < 0) $fatal(1, \"setmask: net %s not found\", path);")?;
    writeln!(tb, "        if (force_net_by_name_dpi(path, value == 0) != 0)")?;
    writeln!(tb, "          $fatal(1, \"setmask: cannot force %s\", path);")?;
    writeln!(tb, "        #(SETTLE);")?;
    let same: Vec<String> = netlist
        .outputs
        .iter()
        .map(|(name, _)| format!("{0} === golden_{0}", name))
        .collect();
    let same = if same.is_empty() { "1".to_string() } else { same.join(" && ") };
    writeln!(tb, "        if ({}) logic_masked++;", same)?;
    writeln!(tb, "        void'(release_net_by_name_dpi(path));")?;
    writeln!(tb, "        simulated++;")?;
    writeln!(tb, "      end")?;
    writeln!(tb, "    end")?;
    writeln!(tb, "    $fclose(fd);")?;
    writeln!(tb)?;
    writeln!(tb, "    fd = $fopen({}, \"w\");", sv_string(&o.result_file))?;
    writeln!(tb, "    $fdisplay(fd, \"%0d\", logic_masked);")?;
    writeln!(tb, "    $fclose(fd);")?;
    writeln!(tb, "    $display(\"setmask: %0d of %0d simulated faults logic-masked\",")?;
    writeln!(tb, "             logic_masked, simulated);")?;
    writeln!(tb, "    $finish;")?;
    writeln!(tb, "  end")?;
    writeln!(tb, "endmodule")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlist::OutputPorts;
    use crate::verilog;

    fn options() -> TestbenchOptions {
        TestbenchOptions {
            faults_file: "build/faults.txt".into(),
            nets_file: "build/nets.txt".into(),
            result_file: "build/tb_output.txt".into(),
            settle_ps: 5000,
            num_sites: 8,
        }
    }

    #[test]
    fn test_adder2_bench() {
        let src = include_str!("../tests/fixtures/adder2.vg");
        let nl = verilog::load_str(src, None, &OutputPorts::default()).unwrap();
        let tb = generate(&nl, &options());

        assert!(tb.contains("module setmask_tb;"));
        assert!(tb.contains("  reg [1:0] A;\n  reg [1:0] B;\n"));
        assert!(tb.contains("  wire [1:0] S;\n  reg [1:0] golden_S;\n"));
        assert!(tb.contains("  reg [1:0] golden_S;\n  wire CO;\n  reg golden_CO;\n"));
        assert!(tb.contains("  adder2 dut (\n    .A(A),\n    .B(B),\n"));
        assert!(tb.contains("    .B(B),\n    .S(S),\n    .CO(CO)\n  );"));
        assert!(tb.contains("localparam int NUM_SITES = 8;"));
        assert!(tb.contains("localparam int SETTLE = 5000;"));
        assert!(tb.contains("$fopen(\"build/nets.txt\", \"r\")"));
        assert!(tb.contains("$fopen(\"build/tb_output.txt\", \"w\")"));
        assert!(tb.contains("if (S === golden_S && CO === golden_CO) logic_masked++;"));
        assert!(tb.contains("path = {\"setmask_tb.dut.\", nets[site]};"));
        for f in ["force_net_by_name_dpi", "release_net_by_name_dpi", "get_net_value_by_name_dpi"] {
            assert_eq!(tb.matches(f).count(), 2, "{}", f);
        }
        // an unresolved site aborts the run before it can be forced or counted
        let guard = "if (value < 0) $fatal(1, \"setmask: net %s not found\", path);";
        let guard = tb.find(guard).unwrap();
        let read = tb.find("value = get_net_value_by_name_dpi(path);").unwrap();
        let force = "if (force_net_by_name_dpi(path, value == 0) != 0)\n          $fatal(";
        let force = tb.find(force).unwrap();
        let count = tb.find("logic_masked++").unwrap();
        assert!(read < guard && guard < force && force < count);
        assert!(tb.trim_end().ends_with("endmodule"));
    }

    #[test]
    fn test_wide_inputs_and_quoting() {
        assert_eq!(random_expr(1), "$urandom");
        assert_eq!(random_expr(32), "$urandom");
        assert_eq!(random_expr(40), "{$urandom, $urandom}");
        assert_eq!(sv_string(Path::new("a\"b\\c")), "\"a\\\"b\\\\c\"");
    }

    #[test]
    fn test_dpi_helper_matches_imports() {
        for f in ["force_net_by_name_dpi", "release_net_by_name_dpi", "get_net_value_by_name_dpi"] {
            assert!(DPI_IMPORTS.contains(f));
            assert!(DPI_HELPER.contains(&format!("int {}(const char *name", f)), "{}", f);
        }
        assert_eq!(DPI_HELPER.matches("return -1;").count(), 3);
        assert!(DPI_HELPER.contains("vpiForceFlag") && DPI_HELPER.contains("vpiReleaseFlag"));
    }
}
