use chrono::{DateTime, Duration, Utc};

use crate::models::Candle;

/// Fold base candles into `target_minutes` buckets aligned to the epoch.
///
/// Only complete buckets are returned: a bucket whose final base candle is
/// missing at the end of the input would still be forming. Gaps inside a
/// bucket are tolerated.
pub fn aggregate(candles: &[Candle], base_minutes: i64, target_minutes: i64) -> Vec<Candle> {
    if base_minutes <= 0 || target_minutes < base_minutes {
        return Vec::new();
    }
    if target_minutes == base_minutes {
        return candles.iter().map(Candle::stripped).collect();
    }

    let mut out: Vec<Candle> = Vec::new();
    let mut current: Option<Candle> = None;

    for candle in candles {
        let bucket = bucket_start(candle.timestamp, target_minutes);
        match current.as_mut() {
            Some(acc) if acc.timestamp == bucket => {
                acc.high = acc.high.max(candle.high);
                acc.low = acc.low.min(candle.low);
                acc.close = candle.close;
                acc.volume += candle.volume;
            }
            _ => {
                if let Some(done) = current.take() {
                    out.push(done);
                }
                current = Some(Candle::new(
                    bucket,
                    candle.open,
                    candle.high,
                    candle.low,
                    candle.close,
                    candle.volume,
                ));
            }
        }
    }

    if let (Some(last), Some(last_base)) = (current, candles.last()) {
        let bucket_end = last.timestamp + Duration::minutes(target_minutes);
        if last_base.timestamp + Duration::minutes(base_minutes) >= bucket_end {
            out.push(last);
        }
    }
    out
}

fn bucket_start(ts: DateTime<Utc>, minutes: i64) -> DateTime<Utc> {
    let secs = minutes * 60;
    let t = ts.timestamp();
    let start = t - t.rem_euclid(secs);
    DateTime::from_timestamp(start, 0).unwrap_or(ts)
}
