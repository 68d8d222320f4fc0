use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::execution::{ClosedTrade, OrderLifecycleManager, PositionState};

/// Running NAV peak and drawdown of one strategy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerformanceTracker {
    nav_peak: f64,
    max_drawdown_pct: f64,
    /// When the current peak was set; `None` until the first update
    peak_at: Option<DateTime<Utc>>,
    max_drawdown_secs: i64,
}

impl PerformanceTracker {
    pub fn new(initial_nav: f64) -> Self {
        Self {
            nav_peak: initial_nav,
            max_drawdown_pct: 0.0,
            peak_at: None,
            max_drawdown_secs: 0,
        }
    }

    pub fn update(&mut self, nav: f64, at: DateTime<Utc>) {
        let peak_at = *self.peak_at.get_or_insert(at);

        if nav >= self.nav_peak {
            self.nav_peak = nav;
            self.peak_at = Some(at);
            return;
        }

        let drawdown = self.drawdown_pct(nav);
        if drawdown > self.max_drawdown_pct {
            self.max_drawdown_pct = drawdown;
        }
        let underwater = (at - peak_at).num_seconds();
        if underwater > self.max_drawdown_secs {
            self.max_drawdown_secs = underwater;
        }
    }

    pub fn nav_peak(&self) -> f64 {
        self.nav_peak
    }

    pub fn max_drawdown_pct(&self) -> f64 {
        self.max_drawdown_pct
    }

    /// Longest time spent below a previous peak, in seconds
    pub fn max_drawdown_secs(&self) -> i64 {
        self.max_drawdown_secs
    }

    /// Drawdown of `nav` from the peak, in percent
    pub fn drawdown_pct(&self, nav: f64) -> f64 {
        if self.nav_peak > 0.0 {
            ((self.nav_peak - nav) / self.nav_peak * 100.0).max(0.0)
        } else {
            0.0
        }
    }
}

/// Why a snapshot was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotTrigger {
    /// First processed tick of the run
    Start,
    NewDay,
    /// Exactly once per run, including killed runs
    End,
}

/// Point-in-time performance of one strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySnapshot {
    pub strategy_id: String,
    pub kind: String,
    pub symbol: String,
    pub halted: bool,
    pub allocation: f64,
    pub balance: f64,
    pub nav: f64,
    pub nav_peak: f64,
    pub position_volume: f64,
    pub average_price: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub commissions: f64,
    /// NAV relative to allocation, percent
    pub performance_pct: f64,
    pub drawdown_pct: f64,
    pub max_drawdown_pct: f64,
    pub max_drawdown_secs: i64,
    pub exposure: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub win_rate: f64,
    /// Gross wins over gross losses; `None` without a losing trade
    pub profit_factor: Option<f64>,
    pub sharpe_ratio: f64,
    /// `None` without a negative trade return
    pub sortino_ratio: Option<f64>,
}

impl StrategySnapshot {
    pub fn capture(
        strategy_id: &str,
        kind: &str,
        halted: bool,
        book: &OrderLifecycleManager,
        performance: &PerformanceTracker,
    ) -> Self {
        let nav = book.nav();
        let position: &PositionState = book.position();
        let trades = book.trades();
        let stats = TradeStats::from_trades(trades);

        Self {
            strategy_id: strategy_id.to_string(),
            kind: kind.to_string(),
            symbol: book.symbol().to_string(),
            halted,
            allocation: book.allocation(),
            balance: book.balance(),
            nav,
            nav_peak: performance.nav_peak().max(nav),
            position_volume: position.volume,
            average_price: position.average_price,
            realized_pnl: position.realized_pnl,
            unrealized_pnl: book.unrealized_pnl(),
            commissions: position.commissions,
            performance_pct: if book.allocation() > 0.0 {
                (nav / book.allocation() - 1.0) * 100.0
            } else {
                0.0
            },
            drawdown_pct: performance.drawdown_pct(nav),
            max_drawdown_pct: performance.max_drawdown_pct(),
            max_drawdown_secs: performance.max_drawdown_secs(),
            exposure: book.exposure(),
            total_trades: trades.len(),
            winning_trades: stats.winning,
            win_rate: stats.win_rate,
            profit_factor: stats.profit_factor,
            sharpe_ratio: stats.sharpe_ratio,
            sortino_ratio: stats.sortino_ratio,
        }
    }
}

struct TradeStats {
    winning: usize,
    win_rate: f64,
    profit_factor: Option<f64>,
    sharpe_ratio: f64,
    sortino_ratio: Option<f64>,
}

impl TradeStats {
    fn from_trades(trades: &[ClosedTrade]) -> Self {
        if trades.is_empty() {
            return Self {
                winning: 0,
                win_rate: 0.0,
                profit_factor: None,
                sharpe_ratio: 0.0,
                sortino_ratio: None,
            };
        }

        let winning = trades.iter().filter(|t| t.pnl > 0.0).count();
        let total_wins: f64 = trades.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).sum();
        let total_losses: f64 = trades.iter().filter(|t| t.pnl <= 0.0).map(|t| t.pnl.abs()).sum();

        let profit_factor = (total_losses > 0.0).then(|| total_wins / total_losses);

        Self {
            winning,
            win_rate: winning as f64 / trades.len() as f64 * 100.0,
            profit_factor,
            sharpe_ratio: sharpe_ratio(trades),
            sortino_ratio: sortino_ratio(trades),
        }
    }
}

/// Mean over standard deviation of per-trade returns, risk-free rate 0
fn sharpe_ratio(trades: &[ClosedTrade]) -> f64 {
    let returns: Vec<f64> = trades.iter().map(|t| t.return_pct).collect();
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
    let std_dev = variance.sqrt();

    if std_dev > 0.0 {
        mean / std_dev
    } else {
        0.0
    }
}

/// Mean over downside deviation of per-trade returns, target 0
fn sortino_ratio(trades: &[ClosedTrade]) -> Option<f64> {
    let returns: Vec<f64> = trades.iter().map(|t| t.return_pct).collect();
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let downside = returns.iter().map(|r| r.min(0.0).powi(2)).sum::<f64>() / returns.len() as f64;

    (downside > 0.0).then(|| mean / downside.sqrt())
}

/// Portfolio-wide snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub run_id: Uuid,
    pub trigger: SnapshotTrigger,
    pub at: DateTime<Utc>,
    pub total_allocation: f64,
    pub total_nav: f64,
    pub strategies: Vec<StrategySnapshot>,
}

impl PortfolioSnapshot {
    pub fn new(run_id: Uuid, trigger: SnapshotTrigger, at: DateTime<Utc>, strategies: Vec<StrategySnapshot>) -> Self {
        Self {
            run_id,
            trigger,
            at,
            total_allocation: strategies.iter().map(|s| s.allocation).sum(),
            total_nav: strategies.iter().map(|s| s.nav).sum(),
            strategies,
        }
    }

    pub fn total_return_pct(&self) -> f64 {
        if self.total_allocation > 0.0 {
            (self.total_nav / self.total_allocation - 1.0) * 100.0
        } else {
            0.0
        }
    }

    /// Print a formatted report to stdout
    pub fn print_report(&self) {
        println!("\n╔═══════════════════════════════════════════════════════╗");
        println!("║               PORTFOLIO PERFORMANCE REPORT            ║");
        println!("╚═══════════════════════════════════════════════════════╝\n");

        println!("📊 PORTFOLIO ({:?} @ {})", self.trigger, self.at.format("%Y-%m-%d %H:%M:%S"));
        println!("  Run:                   {}", self.run_id);
        println!("  Allocation:            ${:.2}", self.total_allocation);
        println!(
            "  NAV:                   ${:.2} ({:+.2}%)",
            self.total_nav,
            self.total_return_pct()
        );

        for s in &self.strategies {
            println!("\n📈 {} [{} on {}]{}", s.strategy_id, s.kind, s.symbol, if s.halted { " HALTED" } else { "" });
            println!("  NAV:                   ${:.2} ({:+.2}%)", s.nav, s.performance_pct);
            println!("  Realized P&L:          ${:.2}", s.realized_pnl);
            println!("  Unrealized P&L:        ${:.2}", s.unrealized_pnl);
            println!("  Commissions:           ${:.2}", s.commissions);
            println!("  Position:              {:.6} @ {:.4}", s.position_volume, s.average_price);
            println!("  Trades:                {} ({:.1}% winning)", s.total_trades, s.win_rate);
            if s.total_trades > 0 {
                match s.profit_factor {
                    Some(pf) => println!("  Profit Factor:         {:.2}", pf),
                    None => println!("  Profit Factor:         n/a (no losing trades)"),
                }
                println!("  Sharpe Ratio:          {:.2}", s.sharpe_ratio);
                if let Some(sortino) = s.sortino_ratio {
                    println!("  Sortino Ratio:         {:.2}", sortino);
                }
            }
            println!(
                "  Max Drawdown:          {:.2}% ({:.1}h underwater)",
                s.max_drawdown_pct,
                s.max_drawdown_secs as f64 / 3_600.0
            );
        }

        println!("\n═════════════════════════════════════════════════════════\n");
    }
}
