use kmirror_models::{Candle, Severity};

/// One abnormal close→open transition.
#[derive(Debug, Clone)]
pub struct PriceGap {
    pub open_time: i64,
    pub prev_close: f64,
    pub open: f64,
    /// Signed percent move from the previous close.
    pub gap_pct: f64,
    pub z_score: f64,
    pub severity: Severity,
}

/// Detect price discontinuities over an oldest-first candle window.
///
/// A transition is flagged when its absolute percentage exceeds
/// `critical_pct`, or when its z-score against the window exceeds
/// `z_threshold`. The absolute threshold dominates severity. Windows under
/// 10 transitions carry too little signal and produce nothing.
pub fn detect_price_gaps(
    candles: &[Candle],
    z_threshold: f64,
    critical_pct: f64,
    high_pct: f64,
) -> Vec<PriceGap> {
    if candles.len() < 10 {
        return Vec::new();
    }

    struct Transition {
        open_time: i64,
        prev_close: f64,
        open: f64,
        gap_pct: f64,
    }

    let transitions: Vec<Transition> = candles
        .windows(2)
        .filter_map(|pair| {
            let prev_close = pair[0].close;
            if prev_close <= 0.0 {
                return None;
            }
            Some(Transition {
                open_time: pair[1].open_time,
                prev_close,
                open: pair[1].open,
                gap_pct: (pair[1].open - prev_close) / prev_close * 100.0,
            })
        })
        .collect();
    if transitions.is_empty() {
        return Vec::new();
    }

    let abs_gaps: Vec<f64> = transitions.iter().map(|t| t.gap_pct.abs()).collect();
    let n = abs_gaps.len() as f64;
    let mean = abs_gaps.iter().sum::<f64>() / n;
    let variance = abs_gaps.iter().map(|g| (g - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    transitions
        .iter()
        .zip(abs_gaps.iter())
        .filter_map(|(t, abs_gap)| {
            let z = if std_dev > 0.0 {
                (abs_gap - mean) / std_dev
            } else {
                0.0
            };
            let is_critical_gap = *abs_gap >= critical_pct;
            let is_zscore_anomaly = z.abs() > z_threshold;
            if !is_critical_gap && !is_zscore_anomaly {
                return None;
            }
            let severity = if is_critical_gap || z.abs() > 5.0 {
                Severity::Critical
            } else if *abs_gap >= high_pct || z.abs() > 4.0 {
                Severity::High
            } else {
                Severity::Medium
            };
            Some(PriceGap {
                open_time: t.open_time,
                prev_close: t.prev_close,
                open: t.open,
                gap_pct: t.gap_pct,
                z_score: z,
                severity,
            })
        })
        .collect()
}
