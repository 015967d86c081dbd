// =============================================================================
// Quantitative indicators
// =============================================================================

pub mod macd;
