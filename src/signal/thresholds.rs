//! Population-derived plausibility thresholds
//!
//! Threshold tables are XML documents of the form
//!
//! ```xml
//! <distribution>
//!   <sex type="female">
//!     <age agefrom="18" ageto="39">
//!       <percentile2.5>55.0</percentile2.5>
//!       <percentile97.5>95.0</percentile97.5>
//!     </age>
//!   </sex>
//! </distribution>
//! ```
//!
//! Element names other than the percentiles do not matter; the `type` and
//! `agefrom`/`ageto` attributes open the sex and age scopes.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

/// Default lower plausibility bound (bpm)
pub const DEFAULT_LOW_BPM: f64 = 70.0;

/// Default upper plausibility bound (bpm)
pub const DEFAULT_HIGH_BPM: f64 = 80.0;

/// Errors from loading a threshold table
#[derive(Debug, Error)]
pub enum ThresholdError {
    #[error("Threshold file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to open threshold file: {0}")]
    Open(#[from] std::io::Error),

    #[error("Failed to parse threshold file: {0}")]
    Parse(String),

    #[error("No record for {sex}, age {age}, alpha {alpha}")]
    NoMatchingRecord {
        sex: Sex,
        age: u32,
        alpha: TwoSidedAlpha,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    Male,
    Female,
}

impl Sex {
    /// Value of the `type` attribute selecting this sex
    pub fn as_str(&self) -> &'static str {
        match self {
            Sex::Male => "male",
            Sex::Female => "female",
        }
    }
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sex {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "male" | "m" => Ok(Sex::Male),
            "female" | "f" => Ok(Sex::Female),
            _ => Err(format!("Unknown sex: {} (expected male or female)", s)),
        }
    }
}

/// Two-sided significance level of the plausibility interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TwoSidedAlpha {
    Two,
    Five,
    Ten,
    Twenty,
    Fifty,
}

impl TwoSidedAlpha {
    /// Element names of the lower and upper percentile
    pub fn percentile_labels(&self) -> (&'static str, &'static str) {
        match self {
            TwoSidedAlpha::Two => ("percentile1.0", "percentile99.0"),
            TwoSidedAlpha::Five => ("percentile2.5", "percentile97.5"),
            TwoSidedAlpha::Ten => ("percentile5.0", "percentile95.0"),
            TwoSidedAlpha::Twenty => ("percentile10.0", "percentile90.0"),
            TwoSidedAlpha::Fifty => ("percentile25.0", "percentile75.0"),
        }
    }

    pub fn percent(&self) -> u32 {
        match self {
            TwoSidedAlpha::Two => 2,
            TwoSidedAlpha::Five => 5,
            TwoSidedAlpha::Ten => 10,
            TwoSidedAlpha::Twenty => 20,
            TwoSidedAlpha::Fifty => 50,
        }
    }
}

impl fmt::Display for TwoSidedAlpha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.percent())
    }
}

impl FromStr for TwoSidedAlpha {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_end_matches('%').to_lowercase().as_str() {
            "2" | "two" => Ok(TwoSidedAlpha::Two),
            "5" | "five" => Ok(TwoSidedAlpha::Five),
            "10" | "ten" => Ok(TwoSidedAlpha::Ten),
            "20" | "twenty" => Ok(TwoSidedAlpha::Twenty),
            "50" | "fifty" => Ok(TwoSidedAlpha::Fifty),
            _ => Err(format!("Unknown alpha: {} (expected 2, 5, 10, 20 or 50)", s)),
        }
    }
}

/// Closed bpm interval a pulse estimate is considered plausible in
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlausibleRange {
    pub low: f64,
    pub high: f64,
}

impl PlausibleRange {
    pub fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    pub fn contains(&self, bpm: f64) -> bool {
        bpm >= self.low && bpm <= self.high
    }
}

impl Default for PlausibleRange {
    fn default() -> Self {
        Self::new(DEFAULT_LOW_BPM, DEFAULT_HIGH_BPM)
    }
}

/// Which percentile element's text is being read
#[derive(Debug, Clone, Copy, PartialEq)]
enum Pending {
    Lower,
    Upper,
}

/// Look up the plausibility range for a sex, age and alpha
pub fn load_thresholds(
    path: &Path,
    sex: Sex,
    age: u32,
    alpha: TwoSidedAlpha,
) -> Result<PlausibleRange, ThresholdError> {
    if !path.exists() {
        return Err(ThresholdError::FileNotFound(path.to_path_buf()));
    }
    let file = File::open(path)?;
    let mut reader = Reader::from_reader(BufReader::new(file));
    reader.config_mut().trim_text(true);

    let (lower_label, upper_label) = alpha.percentile_labels();

    let mut buf = Vec::new();
    let mut depth = 0usize;
    // Depth at which the matching sex / age element was opened
    let mut sex_scope: Option<usize> = None;
    let mut age_scope: Option<usize> = None;
    let mut pending: Option<Pending> = None;
    let mut lower: Option<f64> = None;
    let mut upper: Option<f64> = None;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| ThresholdError::Parse(format!("{} at byte {}", e, reader.buffer_position())))?;

        match event {
            Event::Start(e) => {
                depth += 1;
                if sex_scope.is_none() && matches_sex(&e, sex)? {
                    sex_scope = Some(depth);
                }
                // A record may carry sex and age bracket on the same element
                if sex_scope.is_some() && age_scope.is_none() {
                    if matches_age(&e, age)? {
                        age_scope = Some(depth);
                    }
                } else if age_scope.is_some() {
                    let name = e.name();
                    if name.as_ref() == lower_label.as_bytes() {
                        pending = Some(Pending::Lower);
                    } else if name.as_ref() == upper_label.as_bytes() {
                        pending = Some(Pending::Upper);
                    }
                }
            }
            Event::Text(t) => {
                if let Some(which) = pending {
                    let text = t
                        .unescape()
                        .map_err(|e| ThresholdError::Parse(e.to_string()))?;
                    let value: f64 = text.trim().parse().map_err(|_| {
                        ThresholdError::Parse(format!("invalid percentile value: {:?}", text))
                    })?;
                    match which {
                        Pending::Lower => lower = Some(value),
                        Pending::Upper => upper = Some(value),
                    }
                }
            }
            Event::End(_) => {
                pending = None;
                if age_scope == Some(depth) {
                    age_scope = None;
                    lower = None;
                    upper = None;
                }
                if sex_scope == Some(depth) {
                    sex_scope = None;
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }

        if let (Some(low), Some(high)) = (lower, upper) {
            debug!(
                "Loaded thresholds for {} age {} ({}): {:.1}-{:.1} bpm",
                sex, age, alpha, low, high
            );
            return Ok(PlausibleRange::new(low, high));
        }
        buf.clear();
    }

    warn!("No threshold record for {} age {} ({})", sex, age, alpha);
    Err(ThresholdError::NoMatchingRecord { sex, age, alpha })
}

fn attribute(e: &BytesStart, key: &str) -> Result<Option<String>, ThresholdError> {
    for attr in e.attributes() {
        let attr = attr.map_err(|e| ThresholdError::Parse(e.to_string()))?;
        if attr.key.as_ref() == key.as_bytes() {
            let value = attr
                .unescape_value()
                .map_err(|e| ThresholdError::Parse(e.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn matches_sex(e: &BytesStart, sex: Sex) -> Result<bool, ThresholdError> {
    Ok(attribute(e, "type")?.as_deref() == Some(sex.as_str()))
}

fn matches_age(e: &BytesStart, age: u32) -> Result<bool, ThresholdError> {
    let Some(from) = attribute(e, "agefrom")? else {
        return Ok(false);
    };
    let to = attribute(e, "ageto")?
        .ok_or_else(|| ThresholdError::Parse("agefrom without ageto".to_string()))?;

    let parse = |s: &str| {
        s.trim()
            .parse::<u32>()
            .map_err(|_| ThresholdError::Parse(format!("invalid age bound: {:?}", s)))
    };
    Ok(parse(&from)? <= age && age <= parse(&to)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const TABLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<distribution>
  <sex type="male">
    <age agefrom="18" ageto="39">
      <percentile2.5>50.0</percentile2.5>
      <percentile97.5>90.0</percentile97.5>
    </age>
  </sex>
  <sex type="female">
    <age agefrom="18" ageto="24">
      <percentile2.5>58.0</percentile2.5>
      <percentile97.5>99.0</percentile97.5>
    </age>
    <age agefrom="25" ageto="39">
      <percentile1.0>51.0</percentile1.0>
      <percentile2.5>55.0</percentile2.5>
      <percentile97.5>95.0</percentile97.5>
      <percentile99.0>101.5</percentile99.0>
    </age>
    <age agefrom="40" ageto="60">
      <percentile2.5>53.0</percentile2.5>
      <percentile97.5>93.0</percentile97.5>
    </age>
  </sex>
</distribution>
"#;

    fn write_table(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_female_thirty_five_percent() {
        let file = write_table(TABLE);
        let range = load_thresholds(file.path(), Sex::Female, 30, TwoSidedAlpha::Five).unwrap();
        assert_eq!(range, PlausibleRange::new(55.0, 95.0));
    }

    #[test]
    fn test_other_alpha_and_sex() {
        let file = write_table(TABLE);
        let range = load_thresholds(file.path(), Sex::Female, 39, TwoSidedAlpha::Two).unwrap();
        assert_eq!(range, PlausibleRange::new(51.0, 101.5));

        let range = load_thresholds(file.path(), Sex::Male, 18, TwoSidedAlpha::Five).unwrap();
        assert_eq!(range, PlausibleRange::new(50.0, 90.0));
    }

    #[test]
    fn test_scope_does_not_leak_into_next_section() {
        // Male section has no 40-60 record; the female one must not be used
        let file = write_table(TABLE);
        let result = load_thresholds(file.path(), Sex::Male, 45, TwoSidedAlpha::Five);
        assert!(matches!(result, Err(ThresholdError::NoMatchingRecord { .. })));
    }

    #[test]
    fn test_sex_and_age_on_one_element() {
        let file = write_table(
            r#"<distribution>
  <record type="female" agefrom="18" ageto="24">
    <percentile2.5>58.0</percentile2.5>
    <percentile97.5>99.0</percentile97.5>
  </record>
  <record type="female" agefrom="25" ageto="39">
    <percentile2.5>55.0</percentile2.5>
    <percentile97.5>95.0</percentile97.5>
  </record>
</distribution>"#,
        );
        let range = load_thresholds(file.path(), Sex::Female, 30, TwoSidedAlpha::Five).unwrap();
        assert_eq!(range, PlausibleRange::new(55.0, 95.0));

        let result = load_thresholds(file.path(), Sex::Male, 30, TwoSidedAlpha::Five);
        assert!(matches!(result, Err(ThresholdError::NoMatchingRecord { .. })));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.xml");
        let result = load_thresholds(&path, Sex::Female, 30, TwoSidedAlpha::Five);
        assert!(matches!(result, Err(ThresholdError::FileNotFound(_))));
    }

    #[test]
    fn test_unopenable_path() {
        // A directory exists but cannot be read as a table
        let dir = tempfile::tempdir().unwrap();
        let result = load_thresholds(dir.path(), Sex::Female, 30, TwoSidedAlpha::Five);
        assert!(matches!(
            result,
            Err(ThresholdError::Open(_)) | Err(ThresholdError::Parse(_))
        ));
    }

    #[test]
    fn test_malformed_xml() {
        let file = write_table("<distribution><sex type=\"female\"></age></distribution>");
        let result = load_thresholds(file.path(), Sex::Female, 30, TwoSidedAlpha::Five);
        assert!(matches!(result, Err(ThresholdError::Parse(_))));
    }

    #[test]
    fn test_non_numeric_percentile() {
        let file = write_table(
            r#"<d><sex type="female"><age agefrom="0" ageto="99">
            <percentile2.5>low</percentile2.5><percentile97.5>95</percentile97.5>
            </age></sex></d>"#,
        );
        let result = load_thresholds(file.path(), Sex::Female, 30, TwoSidedAlpha::Five);
        assert!(matches!(result, Err(ThresholdError::Parse(_))));
    }

    #[test]
    fn test_no_matching_age() {
        let file = write_table(TABLE);
        let result = load_thresholds(file.path(), Sex::Female, 70, TwoSidedAlpha::Five);
        assert!(matches!(result, Err(ThresholdError::NoMatchingRecord { .. })));
    }

    #[test]
    fn test_alpha_and_sex_parsing() {
        assert_eq!("5%".parse::<TwoSidedAlpha>().unwrap(), TwoSidedAlpha::Five);
        assert_eq!("fifty".parse::<TwoSidedAlpha>().unwrap(), TwoSidedAlpha::Fifty);
        assert!("7".parse::<TwoSidedAlpha>().is_err());
        assert_eq!("F".parse::<Sex>().unwrap(), Sex::Female);
        assert!("x".parse::<Sex>().is_err());
    }

    #[test]
    fn test_default_range() {
        let range = PlausibleRange::default();
        assert!(range.contains(70.0));
        assert!(range.contains(80.0));
        assert!(!range.contains(80.5));
    }
}
