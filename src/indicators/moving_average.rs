use serde::{Deserialize, Serialize};

/// Calculate Simple Moving Average (SMA)
pub fn calculate_sma(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let sum: f64 = prices.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// Calculate Exponential Moving Average (EMA)
pub fn calculate_ema(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let multiplier = 2.0 / (period as f64 + 1.0);

    // Start with SMA
    let initial_sma = calculate_sma(&prices[0..period], period)?;

    let mut ema = initial_sma;
    for price in &prices[period..] {
        ema = (price - ema) * multiplier + ema;
    }

    Some(ema)
}

/// Exponentially weighted average over exactly the last `period` prices.
///
/// Weights are `exp(x)` for `period` points evenly spaced on [-1, 0],
/// normalised to sum to one, so the newest price weighs most. Unlike
/// `calculate_ema` the result depends only on the trailing window, which keeps
/// it stable when older candles fall out of a bounded buffer.
pub fn calculate_windowed_ema(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let window = &prices[prices.len() - period..];
    let weights: Vec<f64> = (0..period)
        .map(|i| {
            let x = if period == 1 {
                0.0
            } else {
                -1.0 + i as f64 / (period - 1) as f64
            };
            x.exp()
        })
        .collect();
    let total: f64 = weights.iter().sum();

    let weighted: f64 = window.iter().zip(&weights).map(|(p, w)| p * w).sum();
    Some(weighted / total)
}

/// Which average the phase rules see as "fast" / "slow"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovingAverageKind {
    Ema,
    #[default]
    Windowed,
}

impl MovingAverageKind {
    pub fn compute(self, prices: &[f64], period: usize) -> Option<f64> {
        match self {
            MovingAverageKind::Ema => calculate_ema(prices, period),
            MovingAverageKind::Windowed => calculate_windowed_ema(prices, period),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sma() {
        let prices = vec![100.0, 102.0, 104.0, 106.0, 108.0];
        let sma = calculate_sma(&prices, 5);
        assert_eq!(sma, Some(104.0));
    }

    #[test]
    fn test_sma_insufficient_data() {
        let prices = vec![100.0, 102.0];
        let sma = calculate_sma(&prices, 5);
        assert!(sma.is_none());
    }

    #[test]
    fn test_ema() {
        let prices = vec![100.0, 102.0, 104.0, 106.0, 108.0, 110.0];
        let ema = calculate_ema(&prices, 5);
        assert!(ema.is_some());
        assert!(ema.unwrap() > 104.0); // EMA should be above initial SMA
    }

    #[test]
    fn test_windowed_ema_constant_series() {
        let prices = vec![1.25; 30];
        let value = calculate_windowed_ema(&prices, 10).unwrap();
        assert!((value - 1.25).abs() < 1e-12);
    }

    #[test]
    fn test_windowed_ema_favours_recent_prices() {
        let prices: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let value = calculate_windowed_ema(&prices, 10).unwrap();
        let sma = calculate_sma(&prices, 10).unwrap();
        assert!(value > sma);
        assert!(value < 9.0);
    }

    #[test]
    fn test_windowed_ema_ignores_older_prices() {
        let mut long = vec![500.0; 15];
        long.extend((0..10).map(|i| i as f64));
        let short: Vec<f64> = (0..10).map(|i| i as f64).collect();
        assert_eq!(
            calculate_windowed_ema(&long, 10),
            calculate_windowed_ema(&short, 10)
        );
    }

    #[test]
    fn test_kind_dispatch() {
        let prices = vec![100.0, 102.0];
        assert!(MovingAverageKind::Ema.compute(&prices, 3).is_none());
        assert!(MovingAverageKind::Windowed.compute(&prices, 2).is_some());
        assert!(MovingAverageKind::Windowed.compute(&prices, 0).is_none());
    }
}
