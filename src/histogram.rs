//! Fixed-bucket histogram for latency distributions.
//!
//! Values inside `[min_val, max_val)` land in equally sized buckets; values
//! outside the range are collected in a separate outlier list and excluded
//! from the aggregate stats, so a single pathological request does not skew
//! the distribution.

use anyhow::{ensure, Result};
use std::fmt::Write as _;

pub struct Histogram {
    min_val: f64,
    max_val: f64,
    buckets: Vec<usize>,
    min_encountered: f64,
    max_encountered: f64,
    total_counts: usize,
    sum: f64,
    outliers: Vec<f64>,
    distribution_name: String,
    distribution_unit: String,
}

impl Histogram {
    /// `min_val` is inclusive, `max_val` exclusive.
    pub fn new(min_val: f64, max_val: f64, num_buckets: usize) -> Result<Self> {
        ensure!(min_val < max_val, "Histogram range must be non-empty");
        ensure!(num_buckets > 0, "Histogram needs at least one bucket");
        Ok(Histogram {
            min_val,
            max_val,
            buckets: vec![0; num_buckets],
            min_encountered: max_val,
            max_encountered: min_val,
            total_counts: 0,
            sum: 0.0,
            outliers: Vec::new(),
            distribution_name: String::new(),
            distribution_unit: String::new(),
        })
    }

    /// Set the measured item's name and unit, used when formatting.
    pub fn set_stats_distribution(&mut self, name: &str, unit: &str) {
        self.distribution_name = name.to_string();
        self.distribution_unit = unit.to_string();
    }

    pub fn bucket_index(&self, val: f64) -> usize {
        let ratio = (val - self.min_val) / (self.max_val - self.min_val);
        ((ratio * self.buckets.len() as f64).floor() as usize).min(self.buckets.len() - 1)
    }

    /// Record `val`; out-of-range values go to the outlier list.
    pub fn add(&mut self, val: f64) {
        if val < self.min_val || val >= self.max_val {
            self.outliers.push(val);
            return;
        }
        let idx = self.bucket_index(val);
        self.buckets[idx] += 1;
        self.min_encountered = self.min_encountered.min(val);
        self.max_encountered = self.max_encountered.max(val);
        self.total_counts += 1;
        self.sum += val;
    }

    pub fn counts(&self) -> usize {
        self.total_counts
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn mean(&self) -> f64 {
        if self.total_counts == 0 {
            return 0.0;
        }
        self.sum / self.total_counts as f64
    }

    pub fn min_seen(&self) -> f64 {
        self.min_encountered
    }

    pub fn max_seen(&self) -> f64 {
        self.max_encountered
    }

    pub fn outliers(&self) -> &[f64] {
        &self.outliers
    }

    pub fn reset(&mut self) {
        self.min_encountered = self.max_val;
        self.max_encountered = self.min_val;
        self.total_counts = 0;
        self.sum = 0.0;
        self.buckets.iter_mut().for_each(|count| *count = 0);
        self.outliers.clear();
    }

    /// Render aggregate stats and the per-bucket distribution; empty buckets
    /// are skipped.
    pub fn format_string(&self) -> String {
        let mut out = String::new();
        let name = &self.distribution_name;
        let unit = &self.distribution_unit;

        if !self.outliers.is_empty() {
            let rendered: Vec<String> = self
                .outliers
                .iter()
                .map(|val| format!("{:.3}", val))
                .collect();
            let _ = writeln!(out, "Outliers {} with unit {}: {}", name, unit, rendered.join(", "));
        }

        let _ = writeln!(out, "Max {} = {:.3} {}", name, self.max_seen(), unit);
        let _ = writeln!(out, "Min {} = {:.3} {}", name, self.min_seen(), unit);
        let _ = writeln!(out, "Mean {} = {:.3} {}", name, self.mean(), unit);

        let interval = (self.max_val - self.min_val) / self.buckets.len() as f64;
        for (idx, &count) in self.buckets.iter().enumerate() {
            if count == 0 {
                continue;
            }
            let bucket_min = self.min_val + interval * idx as f64;
            let bucket_max = (bucket_min + interval).min(self.max_val);
            let percentage = count as f64 / self.total_counts as f64 * 100.0;
            let _ = writeln!(
                out,
                "Distribution {} [{:.3}, {:.3}) {}: {:.3} %",
                name, bucket_min, bucket_max, unit, percentage
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_construction_rejected() {
        assert!(Histogram::new(10.0, 10.0, 5).is_err());
        assert!(Histogram::new(0.0, 10.0, 0).is_err());
    }

    #[test]
    fn test_bucketing_and_stats() {
        let mut histogram = Histogram::new(0.0, 100.0, 10).unwrap();
        histogram.add(5.0);
        histogram.add(15.0);
        histogram.add(15.5);
        histogram.add(99.9);

        assert_eq!(histogram.counts(), 4);
        assert_eq!(histogram.bucket_index(5.0), 0);
        assert_eq!(histogram.bucket_index(15.0), 1);
        assert_eq!(histogram.bucket_index(99.9), 9);
        assert!((histogram.mean() - 33.85).abs() < 1e-9);
        assert_eq!(histogram.min_seen(), 5.0);
        assert_eq!(histogram.max_seen(), 99.9);
    }

    #[test]
    fn test_outliers_excluded_from_stats() {
        let mut histogram = Histogram::new(0.0, 10.0, 5).unwrap();
        histogram.add(5.0);
        histogram.add(-1.0);
        histogram.add(10.0); // max is exclusive
        histogram.add(250.0);

        assert_eq!(histogram.counts(), 1);
        assert_eq!(histogram.outliers(), &[-1.0, 10.0, 250.0]);
        assert_eq!(histogram.mean(), 5.0);
    }

    #[test]
    fn test_reset() {
        let mut histogram = Histogram::new(0.0, 10.0, 5).unwrap();
        histogram.add(3.0);
        histogram.add(42.0);
        histogram.reset();
        assert_eq!(histogram.counts(), 0);
        assert!(histogram.outliers().is_empty());
        assert_eq!(histogram.sum(), 0.0);
    }

    #[test]
    fn test_format_lists_percentages() {
        let mut histogram = Histogram::new(0.0, 10.0, 2).unwrap();
        histogram.set_stats_distribution("latency", "millisec");
        histogram.add(1.0);
        histogram.add(2.0);
        histogram.add(7.0);

        let formatted = histogram.format_string();
        assert!(formatted.contains("Mean latency"));
        assert!(formatted.contains("[0.000, 5.000)"));
        assert!(formatted.contains("66.667 %"));
        assert!(formatted.contains("33.333 %"));
    }
}
