use crate::series::TelemetrySeries;
use serde::Serialize;

/// Samples per rolling window. At the usual 30 s cadence of the node's environmental
/// sensors this is about one hour, but the window is a count, not a duration.
pub const ROLLING_WINDOW: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RollingStat {
    Mean,
    Sum,
}

pub fn rolling_mean(values: &[f64], window: usize, centered: bool) -> Vec<Option<f64>> {
    rolling(values, window, centered, RollingStat::Mean)
}

pub fn rolling_sum(values: &[f64], window: usize, centered: bool) -> Vec<Option<f64>> {
    rolling(values, window, centered, RollingStat::Sum)
}

pub fn smooth_series(series: &TelemetrySeries, stat: RollingStat) -> Vec<Option<f64>> {
    rolling(&series.values(), ROLLING_WINDOW, true, stat)
}

/// Fixed-count rolling statistic with an explicit `None` wherever the window does not
/// fit inside the series or contains a non-finite sample.
///
/// Centered windows cover `[i - w/2, i - w/2 + w)` and are only defined for
/// `w/2 <= i < n - w/2`. Trailing windows cover `(i - w, i]`.
pub fn rolling(
    values: &[f64],
    window: usize,
    centered: bool,
    stat: RollingStat,
) -> Vec<Option<f64>> {
    let n = values.len();
    let mut out = vec![None; n];
    if window == 0 || n < window {
        return out;
    }

    let half = window / 2;
    for (i, slot) in out.iter_mut().enumerate() {
        let start = if centered {
            if i < half || i + half >= n {
                continue;
            }
            i - half
        } else {
            if i + 1 < window {
                continue;
            }
            i + 1 - window
        };

        let span = &values[start..start + window];
        if span.iter().any(|v| !v.is_finite()) {
            continue;
        }
        let total: f64 = span.iter().sum();
        *slot = Some(match stat {
            RollingStat::Mean => total / window as f64,
            RollingStat::Sum => total,
        });
    }
    out
}
