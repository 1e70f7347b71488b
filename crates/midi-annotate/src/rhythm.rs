use serde::{Deserialize, Serialize};
use std::fmt;

/// Rhythmic family of a quantization grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RhythmFamily {
    Simple,
    Triple,
    Quintuple,
}

impl RhythmFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Triple => "triple",
            Self::Quintuple => "quintuple",
        }
    }

    /// Grid scale relative to the plain note value: triplets fit 3 in the
    /// time of 2, quintuplets 5 in the time of 4.
    fn scale(&self) -> f64 {
        match self {
            Self::Simple => 1.0,
            Self::Triple => 2.0 / 3.0,
            Self::Quintuple => 4.0 / 5.0,
        }
    }
}

impl fmt::Display for RhythmFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RhythmFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "simple" => Ok(Self::Simple),
            "triple" | "triplet" => Ok(Self::Triple),
            "quintuple" | "quintuplet" => Ok(Self::Quintuple),
            other => Err(format!("unknown rhythm family: {other}")),
        }
    }
}

/// Which configured rule a candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSlot {
    Primary,
    Secondary,
}

/// One rhythmic grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RhythmRule {
    pub enabled: bool,
    pub family: RhythmFamily,
    /// Note-value denominator: 4 = quarter, 8 = eighth, 16 = sixteenth.
    pub min_note_value: u32,
}

impl RhythmRule {
    pub fn new(family: RhythmFamily, min_note_value: u32) -> Self {
        Self {
            enabled: true,
            family,
            min_note_value,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Grid spacing in ticks. May be fractional for odd resolutions.
    pub fn quantum_ticks(&self, ppq: u16) -> f64 {
        let value = self.min_note_value.max(1) as f64;
        (ppq as f64 * 4.0 / value) * self.family.scale()
    }

    /// Nearest grid point to `tick`. Exact halves round away from zero.
    pub fn snap(&self, tick: u64, ppq: u16) -> u64 {
        let quantum = self.quantum_ticks(ppq);
        if quantum <= 0.0 {
            return tick;
        }
        ((tick as f64 / quantum).round() * quantum).round() as u64
    }

    /// Nearest multiple of the quantum to `duration`, never below one quantum.
    pub fn snap_duration(&self, duration: u64, ppq: u16) -> u64 {
        let quantum = self.quantum_ticks(ppq);
        if quantum <= 0.0 {
            return duration;
        }
        let steps = (duration as f64 / quantum).round().max(1.0);
        (steps * quantum).round() as u64
    }
}

impl Default for RhythmRule {
    fn default() -> Self {
        Self::new(RhythmFamily::Simple, 16)
    }
}

impl fmt::Display for RhythmRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.enabled {
            return f.write_str("off");
        }
        write!(f, "{}/{}", self.family, self.min_note_value)
    }
}

impl std::str::FromStr for RhythmRule {
    type Err = String;

    /// Parses `off` or `family/value`, e.g. `simple/16`, `triple/8`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("off") {
            return Ok(Self::disabled());
        }
        let (family, value) = s
            .split_once('/')
            .ok_or_else(|| format!("expected family/value, got {s}"))?;
        let min_note_value: u32 = value
            .parse()
            .map_err(|_| format!("invalid note value: {value}"))?;
        if min_note_value == 0 {
            return Err("note value must be positive".to_string());
        }
        Ok(Self::new(family.parse()?, min_note_value))
    }
}
