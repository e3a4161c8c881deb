//! Risk Management Module
//!
//! Regime-aware position sizing and stop-loss/trailing-stop distances.

pub mod sizer;
pub mod volatility;

pub use sizer::{PositionSizer, SizedPosition, StopPlan};
pub use volatility::{forecast_from_candles, VolatilityForecast, VolatilityRegime};
