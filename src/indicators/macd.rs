// =============================================================================
// MACD — Moving Average Convergence/Divergence
// =============================================================================
//
// Formula (spans default to 18/39/15):
//   alpha      = 2 / (span + 1)
//   EMA_0      = close_0                        (seeded by the first value)
//   EMA_t      = close_t * alpha + EMA_{t-1} * (1 - alpha)
//   line       = EMA_fast - EMA_slow
//   signal     = EMA(line, signal span)
//   histogram  = line - signal
//
// The EMA here is the plain recursive form with no bias adjustment. It is
// NOT the SMA-seeded variant; the alerting platform computes it this way and
// the momentum gate must agree with it bar for bar.
// =============================================================================

use crate::error::RelayError;

/// Latest MACD values plus the previous histogram bar, which the momentum
/// gate needs for its swing/ratio checks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdReading {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
    pub prev_histogram: f64,
}

/// Recursive EMA over `values`, seeded by the first element.
///
/// Returns an empty `Vec` for empty input or a zero span.
pub fn ema_span(values: &[f64], span: usize) -> Vec<f64> {
    if span == 0 || values.is_empty() {
        return Vec::new();
    }

    let alpha = 2.0 / (span as f64 + 1.0);

    let mut result = Vec::with_capacity(values.len());
    let mut prev = values[0];
    result.push(prev);

    for &v in &values[1..] {
        prev = v * alpha + prev * (1.0 - alpha);
        result.push(prev);
    }

    result
}

/// Compute the MACD reading over an ordered (oldest -> newest) close series.
///
/// Fails with `Calculation` ("insufficient data") when fewer than 2 closes
/// are available — the previous histogram bar would not exist.
pub fn macd(
    closes: &[f64],
    fast_span: usize,
    slow_span: usize,
    signal_span: usize,
) -> Result<MacdReading, RelayError> {
    if closes.len() < 2 {
        return Err(RelayError::Calculation(format!(
            "insufficient data for MACD: {} closes, need at least 2",
            closes.len()
        )));
    }
    if fast_span == 0 || slow_span == 0 || signal_span == 0 {
        return Err(RelayError::Calculation(
            "MACD spans must be non-zero".to_string(),
        ));
    }

    let ema_fast = ema_span(closes, fast_span);
    let ema_slow = ema_span(closes, slow_span);

    let line: Vec<f64> = ema_fast
        .iter()
        .zip(ema_slow.iter())
        .map(|(f, s)| f - s)
        .collect();

    let signal = ema_span(&line, signal_span);

    let histogram: Vec<f64> = line
        .iter()
        .zip(signal.iter())
        .map(|(l, s)| l - s)
        .collect();

    let n = histogram.len();
    Ok(MacdReading {
        macd: line[n - 1],
        signal: signal[n - 1],
        histogram: histogram[n - 1],
        prev_histogram: histogram[n - 2],
    })
}

/// Map a nominal alert interval code to the exchange's candle vocabulary.
/// Unrecognized codes fall back to the smallest supported interval.
pub fn map_interval(raw: &str) -> &'static str {
    match raw {
        "1" => "1m",
        "3" => "3m",
        "5" => "5m",
        "15" => "15m",
        "30" => "30m",
        "60" => "1h",
        "120" => "2h",
        "240" => "4h",
        "D" | "1D" => "1d",
        _ => "1m",
    }
}
