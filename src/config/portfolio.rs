use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::models::Timeframe;

/// Ordered list of traded assets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioDefinition {
    #[serde(default = "default_portfolio_name")]
    pub name: String,
    pub assets: Vec<AssetDefinition>,
}

/// One asset with its candles, indicators and strategies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetDefinition {
    pub symbol: String,
    #[serde(default = "default_timeframes")]
    pub timeframes: Vec<Timeframe>,
    pub ticks: TickSourceDefinition,
    /// Historical ticks replayed before live streaming starts
    #[serde(default)]
    pub warmup: Option<TickSourceDefinition>,
    #[serde(default)]
    pub indicators: Vec<IndicatorDefinition>,
    #[serde(default)]
    pub strategies: Vec<StrategyDefinition>,
}

/// Where backtest ticks come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TickSourceDefinition {
    /// `timestamp,bid,ask` rows
    Csv { path: PathBuf },
    /// Seeded random walk
    Synthetic {
        #[serde(default = "default_scenario")]
        scenario: String,
        start_price: f64,
        #[serde(default = "default_spread")]
        spread: f64,
        count: usize,
        #[serde(default)]
        interval_secs: Option<i64>,
        #[serde(default)]
        seed: Option<u64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorDefinition {
    pub name: String,
    pub kind: String,
    #[serde(default = "default_timeframe")]
    pub timeframe: Timeframe,
    #[serde(default)]
    pub period: Option<usize>,
    /// Indicator this one derives from
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyDefinition {
    pub id: String,
    pub kind: String,
    /// Capital assigned to the strategy
    pub allocation: f64,
    #[serde(default = "default_leverage")]
    pub leverage: f64,
    #[serde(default)]
    pub params: StrategyParams,
}

/// Free-form strategy parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Number(f64),
    Flag(bool),
    Text(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrategyParams(BTreeMap<String, ParamValue>);

impl StrategyParams {
    pub fn insert(&mut self, key: &str, value: ParamValue) {
        self.0.insert(key.to_string(), value);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Numeric parameter, `default` when absent
    pub fn number(&self, key: &str, default: f64) -> Result<f64, ConfigError> {
        match self.0.get(key) {
            None => Ok(default),
            Some(ParamValue::Number(v)) if v.is_finite() => Ok(*v),
            Some(other) => Err(ConfigError::Invalid(format!(
                "parameter '{}' must be a number, got {:?}",
                key, other
            ))),
        }
    }

    pub fn text(&self, key: &str, default: &str) -> Result<String, ConfigError> {
        match self.0.get(key) {
            None => Ok(default.to_string()),
            Some(ParamValue::Text(v)) => Ok(v.clone()),
            Some(other) => Err(ConfigError::Invalid(format!(
                "parameter '{}' must be a string, got {:?}",
                key, other
            ))),
        }
    }
}

fn default_portfolio_name() -> String {
    "portfolio".to_string()
}

fn default_timeframes() -> Vec<Timeframe> {
    vec![Timeframe::MINUTE]
}

fn default_timeframe() -> Timeframe {
    Timeframe::MINUTE
}

fn default_scenario() -> String {
    "sideways".to_string()
}

fn default_spread() -> f64 {
    0.01
}

fn default_leverage() -> f64 {
    1.0
}

impl PortfolioDefinition {
    /// Read a TOML portfolio file
    ///
    /// Relative CSV paths are resolved against the file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::Io {
                path: path.display().to_string(),
                reason: "file not found".to_string(),
            });
        }

        let mut portfolio: PortfolioDefinition = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;

        if let Some(base) = path.parent() {
            portfolio.resolve_paths(base);
        }
        portfolio.validate()?;

        tracing::info!(
            "📂 Loaded portfolio '{}' with {} asset(s) from {}",
            portfolio.name,
            portfolio.assets.len(),
            path.display()
        );
        Ok(portfolio)
    }

    /// Structural checks; kinds are checked when components are built
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.assets.is_empty() {
            return Err(ConfigError::Invalid("portfolio has no assets".to_string()));
        }

        let mut symbols = HashSet::new();
        let mut strategy_ids = HashSet::new();

        for asset in &self.assets {
            if asset.symbol.trim().is_empty() {
                return Err(ConfigError::Invalid("asset with empty symbol".to_string()));
            }
            if !symbols.insert(asset.symbol.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate asset '{}'", asset.symbol)));
            }
            if asset.timeframes.is_empty() {
                return Err(ConfigError::Invalid(format!("asset '{}' has no timeframes", asset.symbol)));
            }

            let mut indicator_names = HashSet::new();
            for indicator in &asset.indicators {
                if !indicator_names.insert(indicator.name.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "duplicate indicator '{}' on '{}'",
                        indicator.name, asset.symbol
                    )));
                }
            }

            for strategy in &asset.strategies {
                if !strategy_ids.insert(strategy.id.as_str()) {
                    return Err(ConfigError::Invalid(format!("duplicate strategy id '{}'", strategy.id)));
                }
                if !(strategy.allocation.is_finite() && strategy.allocation > 0.0) {
                    return Err(ConfigError::Invalid(format!(
                        "strategy '{}' needs a positive allocation",
                        strategy.id
                    )));
                }
                if !(strategy.leverage.is_finite() && strategy.leverage > 0.0) {
                    return Err(ConfigError::Invalid(format!(
                        "strategy '{}' needs a positive leverage",
                        strategy.id
                    )));
                }
            }
        }

        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        for asset in &mut self.assets {
            for source in std::iter::once(&mut asset.ticks).chain(asset.warmup.as_mut()) {
                if let TickSourceDefinition::Csv { path } = source {
                    if path.is_relative() {
                        *path = base.join(&*path);
                    }
                }
            }
        }
    }
}
