//! Dated numeric samples of one observation code, the shared input of every
//! lab and vitals rule.

use chrono::NaiveDateTime;

use crate::models::{Chart, Evidence, Observation};

use super::RuleError;

#[derive(Debug, Clone)]
pub struct Sample<'a> {
    pub date: NaiveDateTime,
    pub value: f64,
    pub unit: Option<&'a str>,
    pub observation: &'a Observation,
}

impl Sample<'_> {
    pub fn evidence(&self) -> Vec<Evidence> {
        self.observation.sources.clone()
    }

    pub fn day(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }
}

/// Samples of `code` ordered oldest first, plus the number of observations
/// carrying the code at all (usable or not).
pub struct Series<'a> {
    pub samples: Vec<Sample<'a>>,
    pub total: usize,
}

impl<'a> Series<'a> {
    /// Collect every observation of `code` that has both a value and a date.
    pub fn collect(chart: &'a Chart, code: &str) -> Result<Self, RuleError> {
        let mut total = 0;
        let mut samples = Vec::new();
        for obs in chart.observations.iter().filter(|o| o.has_code(code)) {
            total += 1;
            let (Some(value), Some(date)) = (obs.value, obs.effective) else {
                continue;
            };
            if !value.is_finite() {
                return Err(RuleError::NonFiniteValue {
                    observation_id: obs.id.clone(),
                });
            }
            samples.push(Sample {
                date,
                value,
                unit: obs.unit.as_deref().map(str::trim).filter(|u| !u.is_empty()),
                observation: obs,
            });
        }
        samples.sort_by_key(|s| s.date);
        Ok(Self { samples, total })
    }

    pub fn usable(&self) -> usize {
        self.samples.len()
    }

    pub fn latest(&self) -> Option<&Sample<'a>> {
        self.samples.last()
    }

    /// The last three samples, when there are at least three.
    pub fn recent_three(&self) -> Option<&[Sample<'a>]> {
        let n = self.samples.len();
        (n >= 3).then(|| &self.samples[n - 3..])
    }

    /// Evidence from each sample at `indices`, in order.
    pub fn evidence_at(&self, indices: &[usize]) -> Vec<Evidence> {
        indices
            .iter()
            .filter_map(|&i| self.samples.get(i))
            .flat_map(|s| s.evidence())
            .collect()
    }

    /// Evidence from up to three consecutive samples framing `index`.
    pub fn evidence_around(&self, index: usize) -> Vec<Evidence> {
        let n = self.samples.len();
        if n == 0 {
            return Vec::new();
        }
        let start = index.saturating_sub(1).min(n.saturating_sub(3));
        let end = (start + 3).min(n);
        self.evidence_at(&(start..end).collect::<Vec<_>>())
    }

    /// Distinct units across samples; `None` counts as a unit when
    /// `count_missing` is set.
    pub fn distinct_units(&self, count_missing: bool) -> Vec<Option<&'a str>> {
        let mut units: Vec<Option<&str>> = Vec::new();
        for sample in &self.samples {
            if sample.unit.is_none() && !count_missing {
                continue;
            }
            if !units.contains(&sample.unit) {
                units.push(sample.unit);
            }
        }
        units
    }
}

pub fn strictly_increasing(samples: &[Sample<'_>]) -> bool {
    samples.windows(2).all(|w| w[0].value < w[1].value)
}

pub fn strictly_decreasing(samples: &[Sample<'_>]) -> bool {
    samples.windows(2).all(|w| w[0].value > w[1].value)
}

/// Render a value the way lab reports print it: whole numbers keep one
/// decimal place ("7.0"), everything else prints as-is.
pub fn fmt_value(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chart::fixtures;

    #[test]
    fn collect_orders_by_date_and_counts_unusable() {
        let mut chart = fixtures::chart();
        chart.observations = fixtures::series("k", "6298-4", "mmol/L", &[("2024-03-01", 4.0), ("2024-01-01", 3.9)]);
        chart
            .observations
            .push(fixtures::observation("k-x", "6298-4", None, Some("mmol/L"), Some("2024-02-01")));
        let series = Series::collect(&chart, "6298-4").unwrap();
        assert_eq!(series.total, 3);
        assert_eq!(series.usable(), 2);
        assert_eq!(series.samples[0].value, 3.9);
        assert_eq!(series.latest().unwrap().day(), "2024-03-01");
    }

    #[test]
    fn non_finite_value_is_an_error() {
        let mut chart = fixtures::chart();
        chart.observations = vec![fixtures::observation("o", "4548-4", Some(f64::NAN), None, Some("2024-01-01"))];
        assert!(matches!(
            Series::collect(&chart, "4548-4"),
            Err(RuleError::NonFiniteValue { .. })
        ));
    }

    #[test]
    fn evidence_window_stays_inside_bounds() {
        let mut chart = fixtures::chart();
        chart.observations = fixtures::series(
            "k",
            "6298-4",
            "mmol/L",
            &[("2024-01-01", 1.0), ("2024-01-02", 2.0), ("2024-01-03", 3.0), ("2024-01-04", 4.0), ("2024-01-05", 5.0)],
        );
        let series = Series::collect(&chart, "6298-4").unwrap();
        let ids = |ev: Vec<Evidence>| ev.iter().map(|e| e.doc_id().to_string()).collect::<Vec<_>>();
        assert_eq!(ids(series.evidence_around(0)), ["Observation/k-0", "Observation/k-1", "Observation/k-2"]);
        assert_eq!(ids(series.evidence_around(2)), ["Observation/k-1", "Observation/k-2", "Observation/k-3"]);
        assert_eq!(ids(series.evidence_around(4)), ["Observation/k-2", "Observation/k-3", "Observation/k-4"]);
    }

    #[test]
    fn whole_values_keep_one_decimal() {
        assert_eq!(fmt_value(7.0), "7.0");
        assert_eq!(fmt_value(7.25), "7.25");
    }
}
