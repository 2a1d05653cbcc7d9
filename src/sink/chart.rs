use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::SinkError;
use crate::monitor::{Role, Summary};

use super::{Chart, ChartSink};

/// Writes each chart as a JSON document a dashboard can plot directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonChartSink;

/// On-disk chart document.
#[derive(Debug, Serialize)]
struct ChartDocument<'a> {
    title: String,
    subtitle: String,
    unit: &'static str,
    date: &'a str,
    consumer: Vec<Point>,
    provider: Vec<Point>,
    summary: Summary,
}

#[derive(Debug, Serialize)]
struct Point {
    /// `HH:mm`
    time: String,
    value: f64,
}

impl ChartSink for JsonChartSink {
    fn render(&self, chart: &Chart<'_>, path: &Path) -> Result<(), SinkError> {
        let points = |role: Role| {
            chart
                .series
                .points
                .iter()
                .map(|(minute, v)| Point {
                    time: format!("{:02}:{:02}", minute.hour(), minute.minute()),
                    value: v[role.index()],
                })
                .collect::<Vec<_>>()
        };
        let doc = ChartDocument {
            title: title(&chart.series.summary),
            subtitle: format!(
                "{}  {}  {}",
                display_service(chart.service),
                chart.method,
                display_date(chart.day)
            ),
            unit: chart.family.unit(),
            date: chart.day,
            consumer: points(Role::Consumer),
            provider: points(Role::Provider),
            summary: chart.series.summary,
        };
        let body = serde_json::to_vec_pretty(&doc)?;

        let io_err = |source| SinkError::ChartIo {
            path: path.to_path_buf(),
            source,
        };
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(io_err)?;
        }
        // Replace atomically so a reader never sees a half-written chart.
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, body).map_err(io_err)?;
        fs::rename(&tmp, path).map_err(io_err)?;
        Ok(())
    }

    fn extension(&self) -> &str {
        "json"
    }
}

/// `max: 2 min: 1 avg: 1.5 sum: 120`, unknown values left out.
pub fn title(summary: &Summary) -> String {
    let mut out = format!("max: {}", format_number(summary.max));
    if let Some(min) = summary.min {
        out.push_str(&format!(" min: {}", format_number(min)));
    }
    out.push_str(&format!(" avg: {}", format_number(summary.avg)));
    if let Some(sum) = summary.sum {
        out.push_str(&format!(" sum: {}", format_number(sum)));
    }
    out
}

/// Thousands separators, at most two decimals, trailing zeros trimmed.
pub fn format_number(value: f64) -> String {
    let cents = (value.abs() * 100.0).round() as u64;
    let (whole, frac) = (cents / 100, cents % 100);

    let digits = whole.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let mut out = String::new();
    if value < 0.0 && cents > 0 {
        out.push('-');
    }
    out.push_str(&grouped);
    if frac > 0 {
        let decimals = format!("{frac:02}");
        out.push('.');
        out.push_str(decimals.trim_end_matches('0'));
    }
    out
}

/// `com.acme.BarService` → `BarService`.
fn display_service(service: &str) -> &str {
    service.rsplit('.').next().unwrap_or(service)
}

/// `20240305` → `2024-03-05`, unchanged if it does not parse.
fn display_date(day: &str) -> String {
    NaiveDate::parse_from_str(day, "%Y%m%d")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|_| day.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{AggregatedSeries, Family};
    use crate::store::MinuteOfDay;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0.0), "0");
        assert_eq!(format_number(2.0), "2");
        assert_eq!(format_number(1.5), "1.5");
        assert_eq!(format_number(0.333), "0.33");
        assert_eq!(format_number(1234567.891), "1,234,567.89");
        assert_eq!(format_number(-1000.0), "-1,000");
    }

    #[test]
    fn test_title_skips_unknown_values() {
        let rate = Summary {
            max: 2.0,
            min: Some(1.0),
            avg: 1.5,
            sum: Some(120.0),
        };
        assert_eq!(title(&rate), "max: 2 min: 1 avg: 1.5 sum: 120");

        let latency = Summary {
            max: 75.0,
            min: None,
            avg: 19.0,
            sum: None,
        };
        assert_eq!(title(&latency), "max: 75 avg: 19");
    }

    #[test]
    fn test_display_helpers() {
        assert_eq!(display_service("com.acme.BarService"), "BarService");
        assert_eq!(display_service("Plain"), "Plain");
        assert_eq!(display_date("20240305"), "2024-03-05");
        assert_eq!(display_date("garbage"), "garbage");
    }

    #[test]
    fn test_render_writes_document() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("20240305/com.acme.Bar/foo/success.json");

        let mut series = AggregatedSeries::default();
        series
            .points
            .insert(MinuteOfDay::new(14, 30).expect("valid"), [2.0, 0.5]);
        series.summary = Summary {
            max: 2.0,
            min: Some(0.5),
            avg: 1.0,
            sum: Some(150.0),
        };
        let chart = Chart {
            family: Family::Rate,
            service: "com.acme.Bar",
            method: "foo",
            day: "20240305",
            series: &series,
        };

        JsonChartSink.render(&chart, &path).expect("render");

        let doc: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).expect("read")).expect("json");
        assert_eq!(doc["unit"], "t/s");
        assert_eq!(doc["subtitle"], "Bar  foo  2024-03-05");
        assert_eq!(doc["consumer"][0]["time"], "14:30");
        assert_eq!(doc["provider"][0]["value"], 0.5);
        assert_eq!(doc["summary"]["sum"], 150.0);
        assert!(!path.with_extension("tmp").exists());
    }
}
