//! Technical indicators computed from candles.
//!
//! All functions sort by candle start time first, so feeds that return
//! newest-first are handled the same as oldest-first.

use crate::types::Candle;

fn sorted_closes(candles: &[Candle]) -> Vec<f64> {
    let mut sorted: Vec<&Candle> = candles.iter().collect();
    sorted.sort_by_key(|c| c.start);
    sorted.iter().map(|c| c.close).collect()
}

/// Relative Strength Index over the last `period` close-to-close changes,
/// using simple average gain and loss.
///
/// Returns 50 with fewer than `period + 1` candles or a flat window, and
/// 100 when the window has gains but no losses.
pub fn rsi(candles: &[Candle], period: usize) -> f64 {
    if period == 0 || candles.len() < period + 1 {
        return 50.0;
    }

    let closes = sorted_closes(candles);
    let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let recent = &changes[changes.len() - period..];

    let gains: f64 = recent.iter().filter(|c| **c > 0.0).sum();
    let losses: f64 = recent.iter().filter(|c| **c < 0.0).map(|c| -c).sum();
    let avg_gain = gains / period as f64;
    let avg_loss = losses / period as f64;

    if avg_loss == 0.0 {
        return if avg_gain > 0.0 { 100.0 } else { 50.0 };
    }

    let rs = avg_gain / avg_loss;
    (100.0 - 100.0 / (1.0 + rs)).clamp(0.0, 100.0)
}

/// Simple moving average of the last `period` closes.
///
/// With fewer than `period` candles, returns the latest close (0 if none).
pub fn sma(candles: &[Candle], period: usize) -> f64 {
    let closes = sorted_closes(candles);
    if period == 0 || closes.len() < period {
        return closes.last().copied().unwrap_or(0.0);
    }
    let window = &closes[closes.len() - period..];
    window.iter().sum::<f64>() / window.len() as f64
}

/// Population standard deviation of the last `period` closes.
///
/// With fewer than `period` candles, returns 0.01.
pub fn stddev(candles: &[Candle], period: usize) -> f64 {
    let closes = sorted_closes(candles);
    if period == 0 || closes.len() < period {
        return 0.01;
    }
    let window = &closes[closes.len() - period..];
    let mean = window.iter().sum::<f64>() / window.len() as f64;
    let variance = window.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / window.len() as f64;
    variance.sqrt()
}
