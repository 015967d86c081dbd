// =============================================================================
// API module — HTTP surface of the relay
// =============================================================================

pub mod auth;
pub mod rest;
