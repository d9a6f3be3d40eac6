//! Extraction of filter efficiency, cross section and event counts from the
//! analyzer's free-text report.
//!
//! Each field has an ordered list of patterns. The first pattern that matches
//! anywhere in the text wins, so the order of the lists matters: an
//! `After filter` cross section is preferred over `Before matching`, which is
//! preferred over any bare `cross section = ... pb` line.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::error::ExtractError;

const NUM: &str = r"([\d.eE+-]+)";

fn compile(pattern: String) -> Regex {
    Regex::new(&pattern).expect("report pattern is valid")
}

static FILTER_EFFICIENCY_PATTERNS: LazyLock<[Regex; 2]> = LazyLock::new(|| {
    [
        compile(format!(
            r"(?i)Filter efficiency \(event-level\)\s*=\s*\([^)]+\)\s*/\s*\([^)]+\)\s*=\s*{NUM}\s*\+-\s*{NUM}"
        )),
        compile(format!(r"(?i)Filter efficiency.*?=\s*{NUM}\s*\+-\s*{NUM}")),
    ]
});

static CROSS_SECTION_PATTERNS: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        compile(format!(
            r"(?i)After filter:\s*(?:final\s+)?(?:total\s+)?cross section\s*=\s*{NUM}\s*\+-\s*{NUM}\s*pb"
        )),
        compile(format!(
            r"(?i)Before matching:\s*(?:total\s+)?cross section\s*=\s*{NUM}\s*\+-\s*{NUM}\s*pb"
        )),
        compile(format!(r"(?i)cross section\s*=\s*{NUM}\s*\+-\s*{NUM}\s*pb")),
    ]
});

static TOTAL_EVENTS: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"(?i)Total\s+(?:number\s+of\s+)?events\s*[=:]\s*(\d+)".to_string())
});

/// Values found in one analyzer report. Any field may be missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedReport {
    pub filter_efficiency: Option<f64>,
    pub filter_efficiency_error: Option<f64>,
    pub cross_section: Option<f64>,
    pub cross_section_error: Option<f64>,
    pub total_events: Option<u64>,
}

/// The persisted result for one process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub filter_efficiency: Option<f64>,
    pub filter_efficiency_error: Option<f64>,
    pub cross_section: Option<f64>,
    pub cross_section_error: Option<f64>,
    pub total_files: usize,
    pub total_events: Option<u64>,
}

impl MetricsRecord {
    /// Builds a record from a parsed report. Returns `None` when the report
    /// carries no filter efficiency, which makes the dataset unparseable.
    pub fn from_report(report: ParsedReport, total_files: usize) -> Option<Self> {
        report.filter_efficiency?;
        Some(Self {
            filter_efficiency: report.filter_efficiency,
            filter_efficiency_error: report.filter_efficiency_error,
            cross_section: report.cross_section,
            cross_section_error: report.cross_section_error,
            total_files,
            total_events: report.total_events,
        })
    }

    /// Placeholder stored by dry runs.
    pub fn dry_run_placeholder(total_files: usize) -> Self {
        Self {
            filter_efficiency: Some(0.0),
            filter_efficiency_error: None,
            cross_section: Some(0.0),
            cross_section_error: None,
            total_files,
            total_events: Some(0),
        }
    }
}

/// Parses an analyzer report.
///
/// Missing or empty text gives `Ok(None)`. Otherwise a report is always
/// returned, even if no pattern matched; deciding that a missing filter
/// efficiency is fatal for the dataset is left to the caller.
pub fn parse(output: Option<&str>) -> Result<Option<ParsedReport>, ExtractError> {
    let text = match output {
        Some(text) if !text.is_empty() => text,
        _ => return Ok(None),
    };

    let mut report = ParsedReport::default();

    if let Some(caps) = first_match(FILTER_EFFICIENCY_PATTERNS.as_slice(), text) {
        report.filter_efficiency = Some(float(&caps, 1, "filter efficiency")?);
        report.filter_efficiency_error = Some(float(&caps, 2, "filter efficiency error")?);
    }

    if let Some(caps) = first_match(CROSS_SECTION_PATTERNS.as_slice(), text) {
        report.cross_section = Some(float(&caps, 1, "cross section")?);
        report.cross_section_error = Some(float(&caps, 2, "cross section error")?);
    }

    if let Some(caps) = TOTAL_EVENTS.captures(text) {
        let token = &caps[1];
        let events = token.parse::<u64>().map_err(|source| ExtractError::Count {
            field: "total events",
            token: token.to_string(),
            source,
        })?;
        report.total_events = Some(events);
    }

    Ok(Some(report))
}

fn first_match<'t>(patterns: &[Regex], text: &'t str) -> Option<Captures<'t>> {
    patterns.iter().find_map(|p| p.captures(text))
}

fn float(caps: &Captures<'_>, group: usize, field: &'static str) -> Result<f64, ExtractError> {
    let token = &caps[group];
    token.parse::<f64>().map_err(|source| ExtractError::Float {
        field,
        token: token.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(text: &str) -> ParsedReport {
        parse(Some(text)).unwrap().unwrap()
    }

    #[test]
    fn test_event_level_filter_efficiency() {
        let report =
            parsed("Filter efficiency (event-level)= (58) / (5000) = 1.160e-02 +- 1.514e-03");
        assert_eq!(report.filter_efficiency, Some(0.0116));
        assert_eq!(report.filter_efficiency_error, Some(0.001514));
    }

    #[test]
    fn test_event_level_wins_over_taking_first_line() {
        let text = "\
Filter efficiency (taking into account weights)= (1.0) / (2.0) = 5.000e-01 +- 1.0e-01
Filter efficiency (event-level)= (58) / (5000) = 1.160e-02 +- 1.514e-03";
        let report = parsed(text);
        assert_eq!(report.filter_efficiency, Some(0.0116));
    }

    #[test]
    fn test_filter_efficiency_fallback() {
        let report = parsed("filter efficiency = 0.25 +- 0.01\n");
        assert_eq!(report.filter_efficiency, Some(0.25));
        assert_eq!(report.filter_efficiency_error, Some(0.01));
    }

    #[test]
    fn test_after_filter_cross_section_preferred() {
        let text = "\
Before matching: total cross section = 1.234e+02 +- 5.678e+00 pb
After filter: final cross section = 4.560e+00 +- 2.000e-01 pb";
        let report = parsed(text);
        assert_eq!(report.cross_section, Some(4.56));
        assert_eq!(report.cross_section_error, Some(0.2));
    }

    #[test]
    fn test_before_matching_cross_section() {
        let report = parsed("Before matching: total cross section = 1.234e+02 +- 5.678e+00 pb");
        assert_eq!(report.cross_section, Some(123.4));
        assert_eq!(report.cross_section_error, Some(5.678));
        assert_eq!(report.filter_efficiency, None);
    }

    #[test]
    fn test_bare_cross_section_is_case_insensitive() {
        let report = parsed("CROSS SECTION = 12.5 +- 0.5 PB");
        assert_eq!(report.cross_section, Some(12.5));
    }

    #[test]
    fn test_total_events_variants() {
        assert_eq!(parsed("Total number of events = 5000").total_events, Some(5000));
        assert_eq!(parsed("total events: 42").total_events, Some(42));
        assert_eq!(parsed("Total events 42").total_events, None);
    }

    #[test]
    fn test_empty_and_missing_input() {
        assert_eq!(parse(None).unwrap(), None);
        assert_eq!(parse(Some("")).unwrap(), None);
    }

    #[test]
    fn test_unmatched_text_gives_empty_report() {
        assert_eq!(parsed("nothing interesting here"), ParsedReport::default());
    }

    #[test]
    fn test_malformed_number_is_an_error() {
        let err = parse(Some("Filter efficiency = 1.2.3 +- 0.1")).unwrap_err();
        assert!(matches!(
            err,
            ExtractError::Float {
                field: "filter efficiency",
                ..
            }
        ));
    }

    #[test]
    fn test_record_requires_filter_efficiency() {
        let report = parsed("After filter: final cross section = 1.0 +- 0.1 pb");
        assert_eq!(MetricsRecord::from_report(report, 3), None);

        let report = parsed(
            "Filter efficiency (event-level)= (1) / (4) = 2.5e-01 +- 1.0e-02\nTotal number of events = 4",
        );
        let record = MetricsRecord::from_report(report, 3).unwrap();
        assert_eq!(record.total_files, 3);
        assert_eq!(record.total_events, Some(4));
        assert_eq!(record.cross_section, None);
    }
}
