// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Liberty (.lib) reader for per-cell delay lookup.
//!
//! Extracts, per cell:
//! - the worst combinational `cell_rise`/`cell_fall` over all output arcs,
//!   taking the maximum entry of lookup tables as well as scalars
//! - setup/hold constraints of sequential cells
//!
//! Values are converted to picoseconds using the library `time_unit`.

use indexmap::IndexMap;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct TimingArc {
    pub related_pin: String,
    /// `None` means combinational.
    pub timing_type: Option<String>,
    /// Worst of cell_rise / cell_fall, ps.
    pub delay_ps: Option<u64>,
    /// Worst of rise/fall constraint, ps. Constraints may be negative.
    pub constraint_ps: Option<i64>,
}

impl TimingArc {
    fn is_combinational(&self) -> bool {
        match self.timing_type.as_deref() {
            None => true,
            Some(t) => t.starts_with("combinational"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PinTiming {
    pub name: String,
    pub direction: String,
    pub timing_arcs: Vec<TimingArc>,
}

#[derive(Debug, Clone, Default)]
pub struct CellTiming {
    pub name: String,
    /// Has an `ff` or `latch` group.
    pub is_sequential: bool,
    pub pins: IndexMap<String, PinTiming>,
}

impl CellTiming {
    /// Worst propagation delay over all combinational arcs into an output pin.
    pub fn max_combinational_delay(&self) -> Option<u64> {
        self.pins
            .values()
            .filter(|p| p.direction == "output")
            .flat_map(|p| p.timing_arcs.iter())
            .filter(|a| a.is_combinational())
            .filter_map(|a| a.delay_ps)
            .max()
    }

    fn worst_constraint(&self, prefix: &str) -> Option<i64> {
        self.pins
            .values()
            .flat_map(|p| p.timing_arcs.iter())
            .filter(|a| a.timing_type.as_deref().is_some_and(|t| t.starts_with(prefix)))
            .filter_map(|a| a.constraint_ps)
            .max()
    }

    pub fn setup_time(&self) -> Option<i64> {
        self.worst_constraint("setup_")
    }

    pub fn hold_time(&self) -> Option<i64> {
        self.worst_constraint("hold_")
    }
}

#[derive(Debug, Clone, Default)]
pub struct TimingLibrary {
    pub name: String,
    pub time_unit_ps: f64,
    pub cells: IndexMap<String, CellTiming>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LibertyParseError(pub String);

impl std::fmt::Display for LibertyParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Liberty parse error: {}", self.0)
    }
}

impl std::error::Error for LibertyParseError {}

impl TimingLibrary {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LibertyParseError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| LibertyParseError(format!("{}: {}", path.display(), e)))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, LibertyParseError> {
        let mut parser = LibertyParser::new(content);
        let root = parser.parse_root().map_err(LibertyParseError)?;
        if root.kind != "library" {
            return Err(LibertyParseError(format!("expected 'library', found '{}'", root.kind)));
        }
        let time_unit = root.attr("time_unit").unwrap_or("1ns");
        let time_unit_ps = crate::sdf::parse_timescale(time_unit)
            .map_err(|e| LibertyParseError(format!("time_unit '{}': {}", time_unit, e)))?;

        let mut lib = TimingLibrary {
            name: root.args.first().cloned().unwrap_or_default(),
            time_unit_ps,
            cells: IndexMap::new(),
        };
        for cell_group in root.children("cell") {
            let cell = lib.extract_cell(cell_group)?;
            lib.cells.insert(cell.name.clone(), cell);
        }
        Ok(lib)
    }

    fn to_ps(&self, values: &[String]) -> Result<Option<f64>, LibertyParseError> {
        let mut worst: Option<f64> = None;
        let separators = |c: char| c == ',' || c == '\\' || c.is_whitespace();
        for v in values.iter().flat_map(|s| s.split(separators)) {
            if v.is_empty() {
                continue;
            }
            let f: f64 = v
                .parse()
                .map_err(|_| LibertyParseError(format!("invalid table value '{}'", v)))?;
            worst = Some(worst.map_or(f, |w: f64| w.max(f)));
        }
        Ok(worst.map(|w| w * self.time_unit_ps))
    }

    fn extract_cell(&self, group: &Group) -> Result<CellTiming, LibertyParseError> {
        let mut cell = CellTiming {
            name: group.args.first().cloned().unwrap_or_default(),
            is_sequential: group.children("ff").next().is_some()
                || group.children("latch").next().is_some(),
            pins: IndexMap::new(),
        };
        for pin_group in group.children("pin").chain(group.children("bus")) {
            let mut pin = PinTiming {
                name: pin_group.args.first().cloned().unwrap_or_default(),
                direction: pin_group.attr("direction").unwrap_or_default().to_string(),
                timing_arcs: Vec::new(),
            };
            for t in pin_group.children("timing") {
                let mut arc = TimingArc {
                    related_pin: t.attr("related_pin").unwrap_or_default().to_string(),
                    timing_type: t.attr("timing_type").map(str::to_string),
                    ..Default::default()
                };
                for table in &t.groups {
                    let Some(values) = table.complex("values") else { continue };
                    let Some(ps) = self.to_ps(values)? else { continue };
                    match table.kind.as_str() {
                        "cell_rise" | "cell_fall" => {
                            let ps = ps.max(0.0).round() as u64;
                            arc.delay_ps = Some(arc.delay_ps.map_or(ps, |d| d.max(ps)));
                        }
                        "rise_constraint" | "fall_constraint" => {
                            let ps = ps.round() as i64;
                            arc.constraint_ps = Some(arc.constraint_ps.map_or(ps, |c| c.max(ps)));
                        }
                        _ => {}
                    }
                }
                pin.timing_arcs.push(arc);
            }
            cell.pins.insert(pin.name.clone(), pin);
        }
        Ok(cell)
    }

    pub fn get_cell(&self, name: &str) -> Option<&CellTiming> {
        self.cells.get(name)
    }

    /// Worst combinational delay of `cell_type`, ps.
    pub fn cell_delay(&self, cell_type: &str) -> Option<u64> {
        self.cells.get(cell_type)?.max_combinational_delay()
    }

    /// Worst setup constraint over sequential cells, clamped at zero.
    pub fn worst_setup_ps(&self) -> Option<u64> {
        self.cells.values().filter_map(CellTiming::setup_time).max().map(|v| v.max(0) as u64)
    }

    /// Worst hold constraint over sequential cells, clamped at zero.
    pub fn worst_hold_ps(&self) -> Option<u64> {
        self.cells.values().filter_map(CellTiming::hold_time).max().map(|v| v.max(0) as u64)
    }

    pub fn summary(&self) -> String {
        let num_seq = self.cells.values().filter(|c| c.is_sequential).count();
        format!(
            "Liberty {}: {} cells ({} sequential), time unit {} ps",
            self.name,
            self.cells.len(),
            num_seq,
            self.time_unit_ps
        )
    }
}

/// Generic Liberty group: `kind (args) { attrs; complex(..); groups }`.
#[derive(Debug, Default)]
struct Group {
    kind: String,
    args: Vec<String>,
    attrs: Vec<(String, String)>,
    complex: Vec<(String, Vec<String>)>,
    groups: Vec<Group>,
}

impl Group {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    fn complex(&self, name: &str) -> Option<&[String]> {
        self.complex.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_slice())
    }

    fn children<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Group> + 'a {
        self.groups.iter().filter(move |g| g.kind == kind)
    }
}

struct LibertyParser<'a> {
    content: &'a str,
    pos: usize,
}

impl<'a> LibertyParser<'a> {
    fn new(content: &'a str) -> Self {
        Self { content, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.content[self.pos..]
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.content.len() {
            let rest = self.rest();
            let ch = rest.as_bytes()[0];
            if ch.is_ascii_whitespace() {
                self.pos += 1;
            } else if rest.starts_with("\\\n") || rest.starts_with("\\\r\n") {
                // line continuation
                self.pos += if rest.as_bytes()[1] == b'\r' { 3 } else { 2 };
            } else if rest.starts_with("/*") {
                self.pos = match rest.find("*/") {
                    Some(end) => self.pos + end + 2,
                    None => self.content.len(),
                };
            } else if rest.starts_with("//") {
                self.pos = match rest.find('\n') {
                    Some(end) => self.pos + end + 1,
                    None => self.content.len(),
                };
            } else {
                break;
            }
        }
    }

    fn peek_char(&mut self) -> Option<char> {
        self.skip_whitespace();
        self.rest().chars().next()
    }

    fn expect_char(&mut self, ch: char) -> Result<(), String> {
        self.skip_whitespace();
        if self.rest().starts_with(ch) {
            self.pos += ch.len_utf8();
            Ok(())
        } else {
            Err(format!(
                "expected '{}' at position {}, found '{}'",
                ch,
                self.pos,
                self.rest().chars().next().unwrap_or('?')
            ))
        }
    }

    fn read_identifier(&mut self) -> String {
        self.skip_whitespace();
        let start = self.pos;
        while self.pos < self.content.len() {
            let ch = self.content.as_bytes()[self.pos];
            if ch.is_ascii_alphanumeric() || ch == b'_' || ch == b'$' || ch == b'.' {
                self.pos += 1;
            } else {
                break;
            }
        }
        self.content[start..self.pos].to_string()
    }

    fn read_string(&mut self) -> Result<String, String> {
        self.expect_char('"')?;
        let start = self.pos;
        match self.rest().find('"') {
            Some(end) => {
                self.pos += end + 1;
                Ok(self.content[start..start + end].to_string())
            }
            None => Err("unterminated string".to_string()),
        }
    }

    /// A quoted string or a bare value up to `;`, `,` or an unbalanced `)`.
    fn read_value(&mut self) -> Result<String, String> {
        self.skip_whitespace();
        if self.rest().starts_with('"') {
            return self.read_string();
        }
        let start = self.pos;
        let mut depth = 0;
        while self.pos < self.content.len() {
            match self.content.as_bytes()[self.pos] {
                b'(' => depth += 1,
                b')' if depth == 0 => break,
                b')' => depth -= 1,
                b';' | b',' | b'\n' if depth == 0 => break,
                _ => {}
            }
            self.pos += 1;
        }
        Ok(self.content[start..self.pos].trim().to_string())
    }

    fn parse_args(&mut self) -> Result<Vec<String>, String> {
        self.expect_char('(')?;
        let mut args = Vec::new();
        loop {
            match self.peek_char() {
                Some(')') => {
                    self.pos += 1;
                    return Ok(args);
                }
                Some(',') => self.pos += 1,
                Some(_) => args.push(self.read_value()?),
                None => return Err("unexpected end of file in argument list".to_string()),
            }
        }
    }

    fn skip_semicolon(&mut self) {
        if self.peek_char() == Some(';') {
            self.pos += 1;
        }
    }

    fn parse_root(&mut self) -> Result<Group, String> {
        let kind = self.read_identifier();
        let args = self.parse_args()?;
        self.expect_char('{')?;
        let mut group = Group { kind, args, ..Default::default() };
        self.parse_body(&mut group)?;
        Ok(group)
    }

    fn parse_body(&mut self, group: &mut Group) -> Result<(), String> {
        loop {
            match self.peek_char() {
                Some('}') => {
                    self.pos += 1;
                    return Ok(());
                }
                None => return Err(format!("unexpected end of file in group '{}'", group.kind)),
                _ => {}
            }
            let name = self.read_identifier();
            if name.is_empty() {
                return Err(format!(
                    "unexpected '{}' at position {}",
                    self.rest().chars().next().unwrap_or('?'),
                    self.pos
                ));
            }
            match self.peek_char() {
                Some(':') => {
                    self.pos += 1;
                    let value = self.read_value()?;
                    self.skip_semicolon();
                    group.attrs.push((name, value));
                }
                Some('(') => {
                    let args = self.parse_args()?;
                    if self.peek_char() == Some('{') {
                        self.pos += 1;
                        let mut child = Group { kind: name, args, ..Default::default() };
                        self.parse_body(&mut child)?;
                        group.groups.push(child);
                    } else {
                        self.skip_semicolon();
                        group.complex.push((name, args));
                    }
                }
                _ => {
                    return Err(format!(
                        "expected ':' or '(' after '{}' at position {}",
                        name, self.pos
                    ))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CELLS_LIB: &str = include_str!("../tests/fixtures/cells.lib");

    #[test]
    fn test_parse_fixture_library() {
        let lib = TimingLibrary::parse(CELLS_LIB).unwrap();
        assert_eq!(lib.name, "setmask_demo");
        assert!((lib.time_unit_ps - 1000.0).abs() < 1e-9);
        assert_eq!(lib.cells.len(), 4);
        assert!(lib.summary().contains("4 cells (1 sequential)"));

        // scalar 0.042 / 0.038 ns
        assert_eq!(lib.cell_delay("and2s1"), Some(42));
        // table maximum 0.081 ns
        assert_eq!(lib.cell_delay("xor2s1"), Some(81));
        assert_eq!(lib.cell_delay("or2s1"), Some(47));
        assert_eq!(lib.cell_delay("nope"), None);
    }

    #[test]
    fn test_sequential_constraints() {
        let lib = TimingLibrary::parse(CELLS_LIB).unwrap();
        let ff = lib.get_cell("dffs1").unwrap();
        assert!(ff.is_sequential);
        // clock-to-q is not a combinational arc
        assert_eq!(ff.max_combinational_delay(), None);
        assert_eq!(ff.setup_time(), Some(95));
        assert_eq!(ff.hold_time(), Some(-12));
        assert_eq!(lib.worst_setup_ps(), Some(95));
        assert_eq!(lib.worst_hold_ps(), Some(0));
    }

    #[test]
    fn test_picosecond_unit_and_continuation() {
        let src = concat!(
            "library (lib1) {\n time_unit : \"1ps\" ;\n cell (inv) {\n",
            " pin (A) { direction : input ; }\n",
            " pin (Y) { direction : output ; function : \"!A\" ;\n",
            " timing () { related_pin : \"A\" ;\n",
            " cell_rise (tmpl) { index_1 (\"0.1, 0.2\") ; values (\"12.4, \\\n 17.6\") ; }\n",
            " } } } }\n",
        );
        let lib = TimingLibrary::parse(src).unwrap();
        assert_eq!(lib.cell_delay("inv"), Some(18));
    }

    #[test]
    fn test_errors() {
        assert!(TimingLibrary::parse("cell (x) { }").is_err());
        assert!(TimingLibrary::parse("library (x) { cell (a) { ").is_err());
        assert!(TimingLibrary::parse("library (x) { time_unit : \"1parsec\" ; }").is_err());
    }
}
