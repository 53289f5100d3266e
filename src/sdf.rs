// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Reader for Standard Delay Format (SDF) 3.0 files.
//!
//! Only what the fault model consumes is kept: per-instance IOPATH delays
//! (reduced to the worst arc) and SETUP/HOLD timing checks. INTERCONNECT
//! and every other construct are skipped.

use std::collections::HashMap;
use std::path::Path;

/// Which corner of (min:typ:max) triples to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdfCorner {
    Min,
    Typ,
    #[default]
    Max,
}

impl std::fmt::Display for SdfCorner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SdfCorner::Min => write!(f, "min"),
            SdfCorner::Typ => write!(f, "typ"),
            SdfCorner::Max => write!(f, "max"),
        }
    }
}

impl std::str::FromStr for SdfCorner {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "min" => Ok(SdfCorner::Min),
            "typ" | "typical" => Ok(SdfCorner::Typ),
            "max" => Ok(SdfCorner::Max),
            _ => Err(format!("Unknown SDF corner '{}', expected min/typ/max", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingCheckType {
    Setup,
    Hold,
}

/// One IOPATH arc: worst of rise and fall at the selected corner.
#[derive(Debug, Clone)]
pub struct SdfIopath {
    pub input_pin: String,
    pub output_pin: String,
    pub delay_ps: u64,
}

#[derive(Debug, Clone)]
pub struct SdfTimingCheck {
    pub check_type: TimingCheckType,
    pub data_pin: String,
    /// Hold checks may be negative.
    pub value_ps: i64,
}

#[derive(Debug, Clone)]
pub struct SdfCell {
    pub cell_type: String,
    /// Instance path, empty for the top-level cell.
    pub instance: String,
    pub iopaths: Vec<SdfIopath>,
    pub timing_checks: Vec<SdfTimingCheck>,
}

impl SdfCell {
    /// Worst IOPATH delay of this instance, if it has any arcs.
    pub fn worst_delay(&self) -> Option<u64> {
        self.iopaths.iter().map(|p| p.delay_ps).max()
    }

    fn worst_check(&self, ty: TimingCheckType) -> Option<i64> {
        self.timing_checks.iter().filter(|c| c.check_type == ty).map(|c| c.value_ps).max()
    }
}

/// Parsed SDF file.
#[derive(Debug, Clone)]
pub struct SdfFile {
    pub design: String,
    pub timescale_ps: f64,
    pub divider: char,
    pub cells: Vec<SdfCell>,
    /// instance path → index in `cells`
    instance_map: HashMap<String, usize>,
    /// last path component → first cell with that leaf name
    leaf_map: HashMap<String, usize>,
}

impl SdfFile {
    pub fn parse_file(path: &Path, corner: SdfCorner) -> Result<Self, SdfParseError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SdfParseError::Io(format!("{}: {}", path.display(), e)))?;
        Self::parse_str(&content, corner)
    }

    pub fn parse_str(input: &str, corner: SdfCorner) -> Result<Self, SdfParseError> {
        let mut parser = SdfParser::new(input, corner);
        parser.parse()
    }

    /// Look up a cell by instance path. Falls back to the last path
    /// component so that `top/U1` matches a flat netlist's `U1`.
    pub fn get_cell(&self, instance: &str) -> Option<&SdfCell> {
        let i = self.instance_map.get(instance).or_else(|| self.leaf_map.get(instance))?;
        self.cells.get(*i)
    }

    /// Worst IOPATH delay of `instance` in picoseconds.
    pub fn instance_delay(&self, instance: &str) -> Option<u64> {
        self.get_cell(instance).and_then(SdfCell::worst_delay)
    }

    /// Worst SETUP check over all cells, clamped at zero.
    pub fn worst_setup_ps(&self) -> Option<u64> {
        self.cells
            .iter()
            .filter_map(|c| c.worst_check(TimingCheckType::Setup))
            .max()
            .map(|v| v.max(0) as u64)
    }

    /// Worst HOLD check over all cells, clamped at zero.
    pub fn worst_hold_ps(&self) -> Option<u64> {
        self.cells
            .iter()
            .filter_map(|c| c.worst_check(TimingCheckType::Hold))
            .max()
            .map(|v| v.max(0) as u64)
    }

    pub fn summary(&self) -> String {
        let num_iopaths: usize = self.cells.iter().map(|c| c.iopaths.len()).sum();
        let num_timing_checks: usize = self.cells.iter().map(|c| c.timing_checks.len()).sum();
        format!(
            "SDF {}: {} cells, {} IOPATH delays, {} timing checks",
            self.design,
            self.cells.len(),
            num_iopaths,
            num_timing_checks
        )
    }
}

#[derive(Debug)]
pub enum SdfParseError {
    Io(String),
    Syntax(String, usize),
    UnexpectedEof,
}

impl std::fmt::Display for SdfParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SdfParseError::Io(msg) => write!(f, "SDF I/O error: {}", msg),
            SdfParseError::Syntax(msg, pos) => {
                write!(f, "SDF syntax error at byte {}: {}", pos, msg)
            }
            SdfParseError::UnexpectedEof => write!(f, "SDF unexpected end of file"),
        }
    }
}

impl std::error::Error for SdfParseError {}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Str(String),
}

struct Tokenizer<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input: input.as_bytes(), pos: 0 }
    }

    fn skip_whitespace_and_comments(&mut self) {
        while self.pos < self.input.len() {
            let ch = self.input[self.pos];
            if ch.is_ascii_whitespace() {
                self.pos += 1;
            } else if ch == b'/' && self.input.get(self.pos + 1) == Some(&b'/') {
                while self.pos < self.input.len() && self.input[self.pos] != b'\n' {
                    self.pos += 1;
                }
            } else if ch == b'/' && self.input.get(self.pos + 1) == Some(&b'*') {
                self.pos += 2;
                while self.pos + 1 < self.input.len() {
                    if self.input[self.pos] == b'*' && self.input[self.pos + 1] == b'/' {
                        break;
                    }
                    self.pos += 1;
                }
                self.pos = (self.pos + 2).min(self.input.len());
            } else {
                break;
            }
        }
    }

    fn next_token(&mut self) -> Option<Token> {
        self.skip_whitespace_and_comments();
        if self.pos >= self.input.len() {
            return None;
        }
        match self.input[self.pos] {
            b'(' => {
                self.pos += 1;
                Some(Token::LParen)
            }
            b')' => {
                self.pos += 1;
                Some(Token::RParen)
            }
            b'"' => {
                self.pos += 1;
                let start = self.pos;
                while self.pos < self.input.len() && self.input[self.pos] != b'"' {
                    self.pos += 1;
                }
                let s = String::from_utf8_lossy(&self.input[start..self.pos]).into_owned();
                if self.pos < self.input.len() {
                    self.pos += 1;
                }
                Some(Token::Str(s))
            }
            _ => {
                let start = self.pos;
                while self.pos < self.input.len() {
                    let c = self.input[self.pos];
                    if c.is_ascii_whitespace() || c == b'(' || c == b')' || c == b'"' {
                        break;
                    }
                    self.pos += 1;
                }
                // backslash escapes in identifiers (U\[3\] → U[3])
                let raw = String::from_utf8_lossy(&self.input[start..self.pos]);
                Some(Token::Str(raw.replace('\\', "")))
            }
        }
    }

    fn peek_token(&mut self) -> Option<Token> {
        let saved = self.pos;
        let tok = self.next_token();
        self.pos = saved;
        tok
    }
}

struct SdfParser<'a> {
    tokenizer: Tokenizer<'a>,
    corner: SdfCorner,
    timescale_ps: f64,
}

impl<'a> SdfParser<'a> {
    fn new(input: &'a str, corner: SdfCorner) -> Self {
        Self { tokenizer: Tokenizer::new(input), corner, timescale_ps: 1000.0 }
    }

    fn syntax<T>(&self, msg: String) -> Result<T, SdfParseError> {
        Err(SdfParseError::Syntax(msg, self.tokenizer.pos))
    }

    fn next(&mut self) -> Result<Token, SdfParseError> {
        self.tokenizer.next_token().ok_or(SdfParseError::UnexpectedEof)
    }

    fn expect(&mut self, want: Token) -> Result<(), SdfParseError> {
        let tok = self.next()?;
        if tok == want {
            Ok(())
        } else {
            self.syntax(format!("expected {:?}, got {:?}", want, tok))
        }
    }

    fn read_str(&mut self) -> Result<String, SdfParseError> {
        match self.next()? {
            Token::Str(s) => Ok(s),
            t => self.syntax(format!("expected string, got {:?}", t)),
        }
    }

    /// Consume everything through the matching ')'.
    fn skip_balanced(&mut self) -> Result<(), SdfParseError> {
        let mut depth = 1u32;
        loop {
            match self.next()? {
                Token::LParen => depth += 1,
                Token::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                Token::Str(_) => {}
            }
        }
    }

    /// Iterate `( KEYWORD ... )` groups until the enclosing ')', handing
    /// each upper-cased keyword to `f` right after it is read. `f` must
    /// consume through the group's closing paren.
    fn for_each_group(
        &mut self,
        mut f: impl FnMut(&mut Self, &str) -> Result<(), SdfParseError>,
    ) -> Result<(), SdfParseError> {
        loop {
            match self.next()? {
                Token::RParen => return Ok(()),
                Token::LParen => {
                    let keyword = self.read_str()?.to_uppercase();
                    f(self, &keyword)?;
                }
                Token::Str(_) => {}
            }
        }
    }

    fn parse(&mut self) -> Result<SdfFile, SdfParseError> {
        self.expect(Token::LParen)?;
        let kw = self.read_str()?;
        if !kw.eq_ignore_ascii_case("DELAYFILE") {
            return self.syntax(format!("expected DELAYFILE, got '{}'", kw));
        }

        let mut design = String::new();
        let mut divider = '/';
        let mut cells = Vec::new();
        self.for_each_group(|p, keyword| {
            match keyword {
                "DESIGN" => {
                    design = p.read_str()?;
                    p.expect(Token::RParen)
                }
                "DIVIDER" => {
                    divider = p.read_str()?.chars().next().unwrap_or('/');
                    p.expect(Token::RParen)
                }
                "TIMESCALE" => {
                    let mut ts = p.read_str()?;
                    // "1 ns" splits into two tokens
                    if let Some(Token::Str(unit)) = p.tokenizer.peek_token() {
                        p.next()?;
                        ts.push_str(&unit);
                    }
                    p.timescale_ps = parse_timescale(&ts)?;
                    p.expect(Token::RParen)
                }
                "CELL" => {
                    cells.push(p.parse_cell()?);
                    Ok(())
                }
                _ => p.skip_balanced(),
            }
        })?;

        let mut instance_map = HashMap::with_capacity(cells.len());
        let mut leaf_map = HashMap::with_capacity(cells.len());
        for (i, c) in cells.iter().enumerate() {
            instance_map.insert(c.instance.clone(), i);
            if let Some(leaf) = c.instance.rsplit(divider).next() {
                leaf_map.entry(leaf.to_string()).or_insert(i);
            }
        }
        Ok(SdfFile {
            design,
            timescale_ps: self.timescale_ps,
            divider,
            cells,
            instance_map,
            leaf_map,
        })
    }

    fn parse_cell(&mut self) -> Result<SdfCell, SdfParseError> {
        let mut cell = SdfCell {
            cell_type: String::new(),
            instance: String::new(),
            iopaths: Vec::new(),
            timing_checks: Vec::new(),
        };
        self.for_each_group(|p, keyword| match keyword {
            "CELLTYPE" => {
                cell.cell_type = p.read_str()?;
                p.expect(Token::RParen)
            }
            "INSTANCE" => {
                if p.tokenizer.peek_token() == Some(Token::RParen) {
                    p.next()?;
                    return Ok(());
                }
                cell.instance = p.read_str()?;
                p.expect(Token::RParen)
            }
            "DELAY" => p.for_each_group(|p, kw| match kw {
                "ABSOLUTE" | "INCREMENT" => p.for_each_group(|p, kw| match kw {
                    "IOPATH" => {
                        cell.iopaths.push(p.parse_iopath()?);
                        Ok(())
                    }
                    _ => p.skip_balanced(),
                }),
                _ => p.skip_balanced(),
            }),
            "TIMINGCHECK" => p.for_each_group(|p, kw| {
                let check_type = match kw {
                    "SETUP" => TimingCheckType::Setup,
                    "HOLD" => TimingCheckType::Hold,
                    _ => return p.skip_balanced(),
                };
                let data_pin = p.read_pin_spec()?;
                p.read_pin_spec()?;
                let value_ps = p.parse_delay_value()?.unwrap_or(0);
                p.expect(Token::RParen)?;
                cell.timing_checks.push(SdfTimingCheck { check_type, data_pin, value_ps });
                Ok(())
            }),
            _ => p.skip_balanced(),
        })?;
        Ok(cell)
    }

    /// `(IOPATH in out rise fall ...)`, reduced to the worst value.
    fn parse_iopath(&mut self) -> Result<SdfIopath, SdfParseError> {
        let input_pin = self.read_pin_spec()?;
        let output_pin = self.read_str()?;
        let mut worst = 0i64;
        loop {
            match self.tokenizer.peek_token() {
                Some(Token::RParen) => {
                    self.next()?;
                    break;
                }
                Some(_) => {
                    if let Some(v) = self.parse_delay_value()? {
                        worst = worst.max(v);
                    }
                }
                None => return Err(SdfParseError::UnexpectedEof),
            }
        }
        Ok(SdfIopath { input_pin, output_pin, delay_ps: worst as u64 })
    }

    /// A pin name or an edge-qualified `(posedge CLK)`.
    fn read_pin_spec(&mut self) -> Result<String, SdfParseError> {
        if self.tokenizer.peek_token() == Some(Token::LParen) {
            self.next()?;
            let _edge = self.read_str()?;
            let pin = self.read_str()?;
            self.expect(Token::RParen)?;
            Ok(pin)
        } else {
            self.read_str()
        }
    }

    /// `0.05`, `(0.05)`, `(0.04:0.05:0.06)` or `()` in picoseconds at the
    /// selected corner. `None` for an empty value.
    fn parse_delay_value(&mut self) -> Result<Option<i64>, SdfParseError> {
        match self.next()? {
            Token::LParen => {
                if self.tokenizer.peek_token() == Some(Token::RParen) {
                    self.next()?;
                    return Ok(None);
                }
                let s = self.read_str()?;
                self.expect(Token::RParen)?;
                self.parse_triple(&s).map(Some)
            }
            Token::Str(s) => self.parse_triple(&s).map(Some),
            t => self.syntax(format!("expected delay value, got {:?}", t)),
        }
    }

    fn parse_triple(&self, s: &str) -> Result<i64, SdfParseError> {
        let parts: Vec<&str> = s.split(':').map(str::trim).collect();
        let val_str = match parts.len() {
            1 => parts[0],
            3 => {
                let idx = match self.corner {
                    SdfCorner::Min => 0,
                    SdfCorner::Typ => 1,
                    SdfCorner::Max => 2,
                };
                // OpenSTA writes min::max with an empty typ slot
                match parts[idx] {
                    "" => match parts.iter().find(|p| !p.is_empty()) {
                        Some(p) => p,
                        None => return Ok(0),
                    },
                    v => v,
                }
            }
            _ => return self.syntax(format!("invalid delay triple '{}'", s)),
        };
        match val_str.parse::<f64>() {
            Ok(v) => Ok((v * self.timescale_ps).round() as i64),
            Err(_) => self.syntax(format!("invalid delay number '{}'", val_str)),
        }
    }
}

/// Parse a timescale like "1ns", "100ps", "10us" into picoseconds.
pub(crate) fn parse_timescale(ts: &str) -> Result<f64, SdfParseError> {
    let ts = ts.trim();
    let num_end = ts.find(|c: char| c.is_ascii_alphabetic()).unwrap_or(ts.len());
    let num_str = ts[..num_end].trim();
    let unit_str = ts[num_end..].trim().to_lowercase();

    let multiplier: f64 = if num_str.is_empty() {
        1.0
    } else {
        num_str
            .parse()
            .map_err(|_| {
                SdfParseError::Syntax(format!("invalid timescale number '{}'", num_str), 0)
            })?
    };
    let unit_ps = match unit_str.as_str() {
        "s" => 1e12,
        "ms" => 1e9,
        "us" => 1e6,
        "ns" => 1e3,
        "ps" => 1.0,
        "fs" => 1e-3,
        _ => return Err(SdfParseError::Syntax(format!("unknown timescale unit '{}'", unit_str), 0)),
    };
    Ok(multiplier * unit_ps)
}
