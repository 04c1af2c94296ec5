use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{ClosedTrade, Side, SymbolSpec};

/// Record of a single trade for analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub ticket: u64,
    pub side: Side,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_price: f64,
    pub volume: f64,
    /// Result in ticks
    pub points: f64,
    /// Result in account currency
    pub pnl: f64,
    pub holding_period_minutes: i64,
}

impl TradeRecord {
    pub fn from_closed(trade: &ClosedTrade, spec: &SymbolSpec) -> Self {
        let points = if spec.tick_size > 0.0 {
            trade.price_pnl() / spec.tick_size
        } else {
            0.0
        };
        Self {
            ticket: trade.ticket,
            side: trade.side,
            entry_time: trade.opened_at,
            exit_time: trade.closed_at,
            entry_price: trade.entry_price,
            exit_price: trade.exit_price,
            volume: trade.volume,
            points,
            pnl: points * spec.tick_value * trade.volume,
            holding_period_minutes: (trade.closed_at - trade.opened_at).num_minutes(),
        }
    }
}

/// Complete backtest performance metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestMetrics {
    // P&L Metrics
    pub total_pnl: f64,
    pub total_return_pct: f64,
    pub initial_balance: f64,
    pub final_balance: f64,

    // Trade Statistics
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,

    // P&L Distribution
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub profit_factor: f64, // Total wins / Total losses

    // Risk Metrics
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,
    pub sharpe_ratio: f64,

    // Holding Period
    pub avg_holding_period_minutes: f64,
    pub max_holding_period_minutes: i64,
    pub min_holding_period_minutes: i64,

    // Activity
    pub orders_placed: usize,
    pub orders_cancelled: usize,
    pub stop_modifications: usize,

    // Trade Records
    pub trades: Vec<TradeRecord>,
}

impl BacktestMetrics {
    /// Calculate metrics from completed trades (oldest first)
    pub fn from_trades(trades: Vec<TradeRecord>, initial_balance: f64) -> Self {
        let total_trades = trades.len();
        let total_pnl: f64 = trades.iter().map(|t| t.pnl).sum();
        let final_balance = initial_balance + total_pnl;

        if total_trades == 0 {
            return Self::empty(initial_balance);
        }

        let total_return_pct = if initial_balance > 0.0 {
            (total_pnl / initial_balance) * 100.0
        } else {
            0.0
        };

        // Win/Loss statistics
        let winning: Vec<&TradeRecord> = trades.iter().filter(|t| t.pnl > 0.0).collect();
        let losing: Vec<&TradeRecord> = trades.iter().filter(|t| t.pnl <= 0.0).collect();

        let win_rate = (winning.len() as f64 / total_trades as f64) * 100.0;

        let total_wins: f64 = winning.iter().map(|t| t.pnl).sum();
        let total_losses: f64 = losing.iter().map(|t| t.pnl.abs()).sum();

        let avg_win = if winning.is_empty() {
            0.0
        } else {
            total_wins / winning.len() as f64
        };
        let avg_loss = if losing.is_empty() {
            0.0
        } else {
            total_losses / losing.len() as f64
        };

        let largest_win = winning.iter().map(|t| t.pnl).fold(0.0, f64::max);
        let largest_loss = losing.iter().map(|t| t.pnl).fold(0.0, f64::min);

        // Profit factor
        let profit_factor = if total_losses > 0.0 {
            total_wins / total_losses
        } else if total_wins > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let (max_drawdown, max_drawdown_pct) = Self::calculate_drawdown(&trades, initial_balance);
        let sharpe_ratio = Self::calculate_sharpe_ratio(&trades);

        let holding: Vec<i64> = trades.iter().map(|t| t.holding_period_minutes).collect();
        let avg_holding_period_minutes = holding.iter().sum::<i64>() as f64 / holding.len() as f64;
        let max_holding_period_minutes = holding.iter().copied().max().unwrap_or(0);
        let min_holding_period_minutes = holding.iter().copied().min().unwrap_or(0);

        Self {
            total_pnl,
            total_return_pct,
            initial_balance,
            final_balance,
            total_trades,
            winning_trades: winning.len(),
            losing_trades: losing.len(),
            win_rate,
            avg_win,
            avg_loss,
            largest_win,
            largest_loss,
            profit_factor,
            max_drawdown,
            max_drawdown_pct,
            sharpe_ratio,
            avg_holding_period_minutes,
            max_holding_period_minutes,
            min_holding_period_minutes,
            orders_placed: 0,
            orders_cancelled: 0,
            stop_modifications: 0,
            trades,
        }
    }

    /// Empty metrics for when no trades occurred
    fn empty(initial_balance: f64) -> Self {
        Self {
            total_pnl: 0.0,
            total_return_pct: 0.0,
            initial_balance,
            final_balance: initial_balance,
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            win_rate: 0.0,
            avg_win: 0.0,
            avg_loss: 0.0,
            largest_win: 0.0,
            largest_loss: 0.0,
            profit_factor: 0.0,
            max_drawdown: 0.0,
            max_drawdown_pct: 0.0,
            sharpe_ratio: 0.0,
            avg_holding_period_minutes: 0.0,
            max_holding_period_minutes: 0,
            min_holding_period_minutes: 0,
            orders_placed: 0,
            orders_cancelled: 0,
            stop_modifications: 0,
            trades: vec![],
        }
    }

    /// Calculate maximum drawdown from trades
    fn calculate_drawdown(trades: &[TradeRecord], initial_value: f64) -> (f64, f64) {
        let mut peak = initial_value;
        let mut max_dd = 0.0;
        let mut current_value = initial_value;

        for trade in trades {
            current_value += trade.pnl;

            if current_value > peak {
                peak = current_value;
            }

            let drawdown = peak - current_value;
            if drawdown > max_dd {
                max_dd = drawdown;
            }
        }

        let max_dd_pct = if peak > 0.0 { (max_dd / peak) * 100.0 } else { 0.0 };

        (max_dd, max_dd_pct)
    }

    /// Per-trade Sharpe ratio on point results, risk-free rate 0
    fn calculate_sharpe_ratio(trades: &[TradeRecord]) -> f64 {
        if trades.is_empty() {
            return 0.0;
        }

        let returns: Vec<f64> = trades.iter().map(|t| t.points).collect();
        let mean_return = returns.iter().sum::<f64>() / returns.len() as f64;

        let variance = returns
            .iter()
            .map(|r| {
                let diff = r - mean_return;
                diff * diff
            })
            .sum::<f64>()
            / returns.len() as f64;

        let std_dev = variance.sqrt();

        if std_dev > 0.0 {
            mean_return / std_dev
        } else {
            0.0
        }
    }
}

impl fmt::Display for BacktestMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "BACKTEST PERFORMANCE REPORT")?;
        writeln!(f)?;
        writeln!(f, "P&L SUMMARY")?;
        writeln!(f, "  Initial Balance:       {:.2}", self.initial_balance)?;
        writeln!(f, "  Final Balance:         {:.2}", self.final_balance)?;
        writeln!(f, "  P&L:                   {:.2} ({:+.2}%)", self.total_pnl, self.total_return_pct)?;
        writeln!(f)?;
        writeln!(f, "ACTIVITY")?;
        writeln!(f, "  Orders Placed:         {}", self.orders_placed)?;
        writeln!(f, "  Orders Cancelled:      {}", self.orders_cancelled)?;
        writeln!(f, "  Stop Modifications:    {}", self.stop_modifications)?;
        writeln!(f)?;
        writeln!(f, "TRADE STATISTICS")?;
        writeln!(f, "  Total Trades:          {}", self.total_trades)?;
        writeln!(f, "  Winning Trades:        {} ({:.1}%)", self.winning_trades, self.win_rate)?;
        writeln!(f, "  Losing Trades:         {}", self.losing_trades)?;

        if self.total_trades > 0 {
            writeln!(f)?;
            writeln!(f, "WIN/LOSS ANALYSIS")?;
            writeln!(f, "  Average Win:           {:.2}", self.avg_win)?;
            writeln!(f, "  Average Loss:          {:.2}", self.avg_loss)?;
            writeln!(f, "  Largest Win:           {:.2}", self.largest_win)?;
            writeln!(f, "  Largest Loss:          {:.2}", self.largest_loss)?;
            writeln!(f, "  Profit Factor:         {:.2}", self.profit_factor)?;
            writeln!(f)?;
            writeln!(f, "RISK METRICS")?;
            writeln!(f, "  Max Drawdown:          {:.2} ({:.2}%)", self.max_drawdown, self.max_drawdown_pct)?;
            writeln!(f, "  Sharpe Ratio:          {:.2}", self.sharpe_ratio)?;
            writeln!(f)?;
            writeln!(f, "HOLDING PERIODS")?;
            writeln!(f, "  Average:               {:.1} minutes", self.avg_holding_period_minutes)?;
            writeln!(f, "  Max:                   {} minutes", self.max_holding_period_minutes)?;
            writeln!(f, "  Min:                   {} minutes", self.min_holding_period_minutes)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn spec() -> SymbolSpec {
        SymbolSpec {
            symbol: "EURUSD".to_string(),
            tick_size: 0.0001,
            stop_level_points: 0,
            spread: 0.0001,
            tick_value: 1.0,
            volume_min: 0.01,
            volume_max: 100.0,
            volume_step: 0.01,
        }
    }

    /// Buy trade worth `points` ticks at one lot
    fn create_test_trade(points: f64, holding_minutes: i64) -> TradeRecord {
        let opened_at = Utc.with_ymd_and_hms(2024, 1, 8, 9, 0, 0).unwrap();
        let closed = ClosedTrade {
            ticket: 1,
            symbol: "EURUSD".to_string(),
            side: Side::Buy,
            entry_price: 1.1000,
            exit_price: 1.1000 + points * 0.0001,
            volume: 1.0,
            opened_at,
            closed_at: opened_at + Duration::minutes(holding_minutes),
        };
        TradeRecord::from_closed(&closed, &spec())
    }

    #[test]
    fn test_trade_record_from_sell() {
        let opened_at = Utc.with_ymd_and_hms(2024, 1, 8, 9, 0, 0).unwrap();
        let closed = ClosedTrade {
            ticket: 3,
            symbol: "EURUSD".to_string(),
            side: Side::Sell,
            entry_price: 1.1000,
            exit_price: 1.0980,
            volume: 0.5,
            opened_at,
            closed_at: opened_at + Duration::minutes(45),
        };
        let record = TradeRecord::from_closed(&closed, &spec());
        assert!((record.points - 20.0).abs() < 1e-6);
        assert!((record.pnl - 10.0).abs() < 1e-6);
        assert_eq!(record.holding_period_minutes, 45);
    }

    #[test]
    fn test_metrics_with_winning_trades() {
        let trades = vec![
            create_test_trade(100.0, 60),
            create_test_trade(50.0, 120),
            create_test_trade(-30.0, 90),
        ];

        let metrics = BacktestMetrics::from_trades(trades, 10000.0);

        assert_eq!(metrics.total_trades, 3);
        assert_eq!(metrics.winning_trades, 2);
        assert_eq!(metrics.losing_trades, 1);
        assert!((metrics.win_rate - 66.66).abs() < 0.1);
        assert!((metrics.total_pnl - 120.0).abs() < 0.01);
        assert!((metrics.final_balance - 10120.0).abs() < 0.01);
        assert!((metrics.avg_holding_period_minutes - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_metrics_with_no_trades() {
        let metrics = BacktestMetrics::from_trades(vec![], 10000.0);

        assert_eq!(metrics.total_trades, 0);
        assert_eq!(metrics.win_rate, 0.0);
        assert_eq!(metrics.total_pnl, 0.0);
        assert_eq!(metrics.final_balance, 10000.0);
    }

    #[test]
    fn test_profit_factor_calculation() {
        let trades = vec![
            create_test_trade(200.0, 60),
            create_test_trade(100.0, 60),
            create_test_trade(-50.0, 60),
        ];

        let metrics = BacktestMetrics::from_trades(trades, 10000.0);

        // Profit factor = Total wins / Total losses = 300 / 50 = 6.0
        assert!((metrics.profit_factor - 6.0).abs() < 0.01);
    }

    #[test]
    fn test_drawdown_calculation() {
        let trades = vec![
            create_test_trade(100.0, 60),  // Peak at 10100
            create_test_trade(-200.0, 60), // Down to 9900 (drawdown: 200)
            create_test_trade(50.0, 60),   // Back to 9950
        ];

        let metrics = BacktestMetrics::from_trades(trades, 10000.0);

        assert!((metrics.max_drawdown - 200.0).abs() < 0.01);
    }

    #[test]
    fn test_report_renders() {
        let metrics = BacktestMetrics::from_trades(vec![create_test_trade(10.0, 5)], 1000.0);
        let report = metrics.to_string();
        assert!(report.contains("Total Trades:          1"));
        assert!(report.contains("Profit Factor"));
    }
}
