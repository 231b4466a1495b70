use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TelemetryPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Ascending-by-timestamp sequence of readings for one metric on one node.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TelemetrySeries {
    points: Vec<TelemetryPoint>,
}

impl TelemetrySeries {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a series from points in any order. Equal timestamps keep their arrival order.
    pub fn from_points(mut points: Vec<TelemetryPoint>) -> Self {
        points.sort_by_key(|point| point.timestamp);
        Self { points }
    }

    pub fn points(&self) -> &[TelemetryPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        self.points.iter().map(|point| point.timestamp).collect()
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|point| point.value).collect()
    }

    /// Mean of the finite values, `None` when there are none.
    pub fn mean(&self) -> Option<f64> {
        let mut total = 0.0;
        let mut count = 0usize;
        for value in self.points.iter().map(|point| point.value) {
            if value.is_finite() {
                total += value;
                count += 1;
            }
        }
        if count == 0 {
            return None;
        }
        Some(total / count as f64)
    }

    /// `(min, max)` over the finite values.
    pub fn value_range(&self) -> Option<(f64, f64)> {
        self.points
            .iter()
            .map(|point| point.value)
            .filter(|value| value.is_finite())
            .fold(None, |acc, value| match acc {
                None => Some((value, value)),
                Some((lo, hi)) => Some((lo.min(value), hi.max(value))),
            })
    }

    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.points.first().map(|point| point.timestamp)
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.points.last().map(|point| point.timestamp)
    }
}
