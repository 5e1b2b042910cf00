//! Metric coercion and chart derivation.
//!
//! The engine ships every KPI as a string. [`coerce`] turns those strings into a
//! [`Reading`]; anything absent or unparsable becomes [`Reading::Missing`], which is a
//! normal "no data" value rather than an error.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Serialize, Serializer};

use crate::schema::{AgentResponse, MetricBlock};

static DECIMAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(?:[0-9]+\.?[0-9]*|\.[0-9]+)(?:[eE][+-]?[0-9]+)?$").expect("decimal pattern")
});

static RADIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^0(?:[xX][0-9a-fA-F]+|[oO][0-7]+|[bB][01]+)$").expect("radix pattern")
});

/// A coerced metric value. `Missing` is distinct from zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    Value(f64),
    Missing,
}

impl Reading {
    pub fn value(self) -> Option<f64> {
        match self {
            Reading::Value(v) => Some(v),
            Reading::Missing => None,
        }
    }

    pub fn is_finite(self) -> bool {
        matches!(self, Reading::Value(v) if v.is_finite())
    }

    /// Float view with `NaN` standing in for `Missing`.
    pub fn as_f64(self) -> f64 {
        self.value().unwrap_or(f64::NAN)
    }
}

// JSON has no NaN/Infinity: anything non-finite goes out as null.
impl Serialize for Reading {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Reading::Value(v) if v.is_finite() => serializer.serialize_f64(*v),
            _ => serializer.serialize_none(),
        }
    }
}

/// Coerce a wire string into a [`Reading`].
///
/// Accepts an optional sign, digits with an optional decimal point, an optional
/// exponent, signed `Infinity`, and unsigned `0x`/`0o`/`0b` integers. Surrounding
/// whitespace is ignored. Absent or empty yields `Missing`, whitespace alone reads as
/// zero, anything else unparsable is `Missing`.
pub fn coerce(raw: Option<&str>) -> Reading {
    let s = match raw {
        None | Some("") => return Reading::Missing,
        Some(raw) => raw.trim(),
    };
    if s.is_empty() {
        return Reading::Value(0.0);
    }

    match s {
        "Infinity" | "+Infinity" => return Reading::Value(f64::INFINITY),
        "-Infinity" => return Reading::Value(f64::NEG_INFINITY),
        _ => {}
    }

    if DECIMAL.is_match(s) {
        return s.parse::<f64>().map(Reading::Value).unwrap_or(Reading::Missing);
    }

    if RADIX.is_match(s) {
        let radix = match s.as_bytes()[1] {
            b'x' | b'X' => 16,
            b'o' | b'O' => 8,
            _ => 2,
        };
        let value = s[2..]
            .chars()
            .filter_map(|c| c.to_digit(radix))
            .fold(0f64, |acc, d| acc * radix as f64 + d as f64);
        return Reading::Value(value);
    }

    Reading::Missing
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MetricLabel {
    #[serde(rename = "CAC")]
    Cac,
    #[serde(rename = "ROAS")]
    Roas,
}

impl MetricLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricLabel::Cac => "CAC",
            MetricLabel::Roas => "ROAS",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRow {
    pub label: MetricLabel,
    pub current: Reading,
    pub previous: Reading,
    #[serde(rename = "deltaPct")]
    pub delta_pct: Reading,
}

impl MetricRow {
    pub fn from_block(label: MetricLabel, block: &MetricBlock) -> Self {
        Self {
            label,
            current: coerce(Some(&block.current)),
            previous: coerce(Some(&block.previous)),
            delta_pct: coerce(Some(&block.delta_pct)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Period {
    Previous,
    Current,
}

/// One bar group: both metrics for a single period, numeric plus the raw string for exact labels.
/// Metrics the engine did not report contribute no keys.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodRow {
    pub period: Period,
    #[serde(rename = "CAC", skip_serializing_if = "Option::is_none")]
    pub cac: Option<Reading>,
    #[serde(rename = "CACRaw", skip_serializing_if = "Option::is_none")]
    pub cac_raw: Option<String>,
    #[serde(rename = "ROAS", skip_serializing_if = "Option::is_none")]
    pub roas: Option<Reading>,
    #[serde(rename = "ROASRaw", skip_serializing_if = "Option::is_none")]
    pub roas_raw: Option<String>,
}

impl PeriodRow {
    fn build(period: Period, response: &AgentResponse) -> Self {
        let pick = |block: &MetricBlock| -> String {
            match period {
                Period::Previous => block.previous.clone(),
                Period::Current => block.current.clone(),
            }
        };
        let cac_raw = response.cac.as_ref().map(pick);
        let roas_raw = response.roas.as_ref().map(pick);
        Self {
            period,
            cac: cac_raw.as_deref().map(|s| coerce(Some(s))),
            cac_raw,
            roas: roas_raw.as_deref().map(|s| coerce(Some(s))),
            roas_raw,
        }
    }

    pub fn reading(&self, label: MetricLabel) -> Option<Reading> {
        match label {
            MetricLabel::Cac => self.cac,
            MetricLabel::Roas => self.roas,
        }
    }

    pub fn raw(&self, label: MetricLabel) -> Option<&str> {
        match label {
            MetricLabel::Cac => self.cac_raw.as_deref(),
            MetricLabel::Roas => self.roas_raw.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Deltas {
    #[serde(rename = "CAC", skip_serializing_if = "Option::is_none")]
    pub cac: Option<Reading>,
    #[serde(rename = "ROAS", skip_serializing_if = "Option::is_none")]
    pub roas: Option<Reading>,
}

impl Deltas {
    pub fn get(&self, label: MetricLabel) -> Option<Reading> {
        match label {
            MetricLabel::Cac => self.cac,
            MetricLabel::Roas => self.roas,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartData {
    pub rows: Vec<MetricRow>,
    pub periods: Vec<PeriodRow>,
    pub deltas: Deltas,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WindowMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
}

impl WindowMeta {
    pub fn from_response(response: &AgentResponse) -> Self {
        Self {
            start: response.window.as_ref().map(|w| w.start.clone()),
            end: response.window.as_ref().map(|w| w.end.clone()),
        }
    }
}

/// Build chart rows for every reported metric (CAC first, then ROAS).
/// Returns `None` when the response carries no metric at all.
pub fn derive_chart(response: &AgentResponse) -> Option<ChartData> {
    if !response.has_metrics() {
        return None;
    }

    let mut rows = Vec::with_capacity(2);
    if let Some(block) = &response.cac {
        rows.push(MetricRow::from_block(MetricLabel::Cac, block));
    }
    if let Some(block) = &response.roas {
        rows.push(MetricRow::from_block(MetricLabel::Roas, block));
    }

    let periods = [Period::Previous, Period::Current]
        .into_iter()
        .map(|p| PeriodRow::build(p, response))
        .collect();

    let deltas = Deltas {
        cac: response.cac.as_ref().map(|b| coerce(Some(&b.delta_pct))),
        roas: response.roas.as_ref().map(|b| coerce(Some(&b.delta_pct))),
    };

    Some(ChartData {
        rows,
        periods,
        deltas,
    })
}

/// Ratio → percentage label: `-0.072456` → `-7.25%`, `0.078115` → `+7.81%`, missing → `—`.
pub fn format_delta(reading: Reading) -> String {
    match reading {
        Reading::Value(v) if v.is_finite() => {
            let sign = if v > 0.0 { "+" } else { "" };
            format!("{}{}%", sign, fixed_2(v * 100.0))
        }
        _ => "—".to_string(),
    }
}

/// Two-decimal text with exact midpoints rounded away from zero; `-0` prints as `0.00`.
fn fixed_2(x: f64) -> String {
    let magnitude = x.abs();
    // A binary float sits exactly halfway between two cents only when it is an odd
    // number of eighths, and `{:.2}` would round those to even.
    let eighths = magnitude * 8.0;
    let midpoint = eighths < 1e15 && eighths.fract() == 0.0 && (eighths as u64) % 2 == 1;
    let text = if midpoint {
        format!("{:.2}", (magnitude * 100.0).ceil() / 100.0)
    } else {
        format!("{:.2}", magnitude)
    };
    if x < 0.0 {
        format!("-{}", text)
    } else {
        text
    }
}

/// Axis/label text: at most six fractional digits, trailing zeros dropped, `—` when not finite.
pub fn format_value(reading: Reading) -> String {
    match reading {
        Reading::Value(v) if v.is_finite() => {
            let fixed = format!("{:.6}", v);
            let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
            if trimmed == "-0" {
                "0".to_string()
            } else {
                trimmed.to_string()
            }
        }
        _ => "—".to_string(),
    }
}
