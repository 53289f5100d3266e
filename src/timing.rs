// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Clock timing parameters and per-pulse timing classification.

/// Clock period and register constraints, in picoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct TimingInfo {
    pub clock_period_ps: u64,
    pub setup_time_ps: u64,
    pub hold_time_ps: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TimingError {
    NonPositivePeriod(f64),
    Negative { what: &'static str, value: f64 },
    /// setup + hold leaves no safe sampling window.
    NoSafeWindow { period_ps: u64, setup_ps: u64, hold_ps: u64 },
}

impl std::fmt::Display for TimingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimingError::NonPositivePeriod(p) => {
                write!(f, "clock period must be positive, got {} ns", p)
            }
            TimingError::Negative { what, value } => {
                write!(f, "{} must not be negative, got {} ns", what, value)
            }
            TimingError::NoSafeWindow { period_ps, setup_ps, hold_ps } => write!(
                f,
                "setup ({} ps) + hold ({} ps) leaves no safe window in a {} ps period",
                setup_ps, hold_ps, period_ps
            ),
        }
    }
}

impl std::error::Error for TimingError {}

/// Round nanoseconds to the nearest picosecond (half away from zero).
pub fn ns_to_ps(ns: f64) -> i64 {
    (ns * 1000.0).round() as i64
}

/// Outcome of the static timing check for one pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultClass {
    /// Entirely inside the safe window; never captured.
    TimingMasked,
    /// Straddles a setup or hold boundary.
    Metastable,
    /// Captured cleanly; only logic simulation can tell.
    NeedsSimulation,
}

impl TimingInfo {
    /// Build from picosecond values, validating the safe window.
    pub fn new(
        clock_period_ps: u64,
        setup_time_ps: u64,
        hold_time_ps: u64,
    ) -> Result<Self, TimingError> {
        if clock_period_ps == 0 {
            return Err(TimingError::NonPositivePeriod(0.0));
        }
        if setup_time_ps + hold_time_ps >= clock_period_ps {
            return Err(TimingError::NoSafeWindow {
                period_ps: clock_period_ps,
                setup_ps: setup_time_ps,
                hold_ps: hold_time_ps,
            });
        }
        Ok(Self { clock_period_ps, setup_time_ps, hold_time_ps })
    }

    /// Build from nanosecond values, rounding each to the nearest picosecond.
    pub fn from_ns(
        clock_period_ns: f64,
        setup_time_ns: f64,
        hold_time_ns: f64,
    ) -> Result<Self, TimingError> {
        if !(clock_period_ns > 0.0) {
            return Err(TimingError::NonPositivePeriod(clock_period_ns));
        }
        for (what, value) in [("setup time", setup_time_ns), ("hold time", hold_time_ns)] {
            if value < 0.0 || value.is_nan() {
                return Err(TimingError::Negative { what, value });
            }
        }
        let period = ns_to_ps(clock_period_ns);
        if period <= 0 {
            return Err(TimingError::NonPositivePeriod(clock_period_ns));
        }
        Self::new(period as u64, ns_to_ps(setup_time_ns) as u64, ns_to_ps(hold_time_ns) as u64)
    }

    /// `(safe_start, safe_end)`: after hold closes, before setup opens.
    pub fn safe_window(&self) -> (u64, u64) {
        (self.hold_time_ps, self.clock_period_ps - self.setup_time_ps)
    }

    /// Classify a pulse `[start, end]` on a net with the given output delay.
    ///
    /// Arrival times are taken modulo the clock period. Masking requires
    /// both ends strictly inside the safe window; touching or crossing a
    /// boundary is a metastability risk. A pulse whose arrival wraps past
    /// the capture edge (or lasts a whole period) straddles the edge and is
    /// always metastable.
    pub fn classify(&self, start_ps: u64, end_ps: u64, output_delay_ps: u64) -> FaultClass {
        let (safe_start, safe_end) = self.safe_window();
        let period = self.clock_period_ps;
        let arrive_start = (start_ps + output_delay_ps) % period;
        let arrive_end = (end_ps + output_delay_ps) % period;

        if end_ps.saturating_sub(start_ps) >= period || arrive_end < arrive_start {
            FaultClass::Metastable
        } else if arrive_start > safe_start && arrive_end < safe_end {
            FaultClass::TimingMasked
        } else if arrive_start < safe_start
            || arrive_start > safe_end
            || arrive_end < safe_start
            || arrive_end > safe_end
        {
            FaultClass::Metastable
        } else {
            FaultClass::NeedsSimulation
        }
    }
}

impl std::fmt::Display for TimingInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (safe_start, safe_end) = self.safe_window();
        write!(
            f,
            "period {} ps, setup {} ps, hold {} ps, safe window ({}, {})",
            self.clock_period_ps, self.setup_time_ps, self.hold_time_ps, safe_start, safe_end
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t5ns() -> TimingInfo {
        TimingInfo::from_ns(5.0, 0.1, 0.1).unwrap()
    }

    #[test]
    fn test_ns_conversion_rounds() {
        let t = t5ns();
        assert_eq!(t, TimingInfo { clock_period_ps: 5000, setup_time_ps: 100, hold_time_ps: 100 });
        assert_eq!(ns_to_ps(0.0004), 0);
        assert_eq!(ns_to_ps(0.0005), 1);
        assert_eq!(ns_to_ps(0.0996), 100);
        assert_eq!(ns_to_ps(1.2346), 1235);
        assert_eq!(t.safe_window(), (100, 4900));
    }

    #[test]
    fn test_invalid_parameters() {
        assert_eq!(TimingInfo::from_ns(0.0, 0.1, 0.1), Err(TimingError::NonPositivePeriod(0.0)));
        for period in [-1.0, f64::NAN, 0.0001] {
            let err = TimingInfo::from_ns(period, 0.0, 0.0);
            assert!(matches!(err, Err(TimingError::NonPositivePeriod(_))), "{}", period);
        }
        assert!(matches!(
            TimingInfo::from_ns(1.0, -0.1, 0.0),
            Err(TimingError::Negative { what: "setup time", .. })
        ));
        let err = TimingInfo::from_ns(1.0, 0.5, 0.5);
        assert!(matches!(err, Err(TimingError::NoSafeWindow { .. })));
        assert!(TimingInfo::new(1000, 499, 500).is_ok());
    }

    #[test]
    fn test_masked_end_to_end_example() {
        // pulse [2000, 2010] on a net 0 ps from the outputs
        assert_eq!(t5ns().classify(2000, 2010, 0), FaultClass::TimingMasked);
        // same pulse shifted by propagation delay, still inside
        assert_eq!(t5ns().classify(2000, 2010, 2500), FaultClass::TimingMasked);
    }

    #[test]
    fn test_boundary_at_safe_start() {
        let t = t5ns();
        // arrive_start == safe_start: not masked (strict >)
        assert_ne!(t.classify(100, 150, 0), FaultClass::TimingMasked);
        // with end inside the window no boundary inequality holds either
        assert_eq!(t.classify(100, 150, 0), FaultClass::NeedsSimulation);
        // once the end crosses safe_end it is metastable
        assert_eq!(t.classify(100, 4950, 0), FaultClass::Metastable);
        // one tick later the same pulse is masked
        assert_eq!(t.classify(101, 150, 0), FaultClass::TimingMasked);
        // one tick earlier it starts inside hold
        assert_eq!(t.classify(99, 150, 0), FaultClass::Metastable);
    }

    #[test]
    fn test_boundary_at_safe_end() {
        let t = t5ns();
        assert_eq!(t.classify(4800, 4900, 0), FaultClass::NeedsSimulation);
        assert_eq!(t.classify(4800, 4899, 0), FaultClass::TimingMasked);
        assert_eq!(t.classify(4800, 4901, 0), FaultClass::Metastable);
    }

    #[test]
    fn test_wraparound_is_modulo_period() {
        let t = t5ns();
        // end wraps into the next cycle's hold region
        assert_eq!(t.classify(4980, 5030, 0), FaultClass::Metastable);
        // both ends land inside the window, but only after crossing the edge
        assert_eq!(t.classify(4000, 6000, 0), FaultClass::Metastable);
        assert_eq!(t.classify(2000, 3000, 2500), FaultClass::Metastable);
        // a full period wide pulse arrives at the same phase it left
        assert_eq!(t.classify(2000, 7000, 0), FaultClass::Metastable);
        // start + delay wraps past one period and lands in the safe window
        assert_eq!(t.classify(3000, 3040, 4000), FaultClass::TimingMasked);
    }

    #[test]
    fn test_classification_is_a_partition() {
        let t = TimingInfo::new(1000, 100, 50).unwrap();
        let mut counts = [0usize; 3];
        for start in (0..1000).step_by(7) {
            for width in [0u64, 1, 40, 55, 300, 999] {
                let class = t.classify(start, start + width, 13);
                counts[class as usize] += 1;
            }
        }
        assert_eq!(counts.iter().sum::<usize>(), 143 * 6);
        assert!(counts.iter().all(|&c| c > 0), "{:?}", counts);
    }
}
