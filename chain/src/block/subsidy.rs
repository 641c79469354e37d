//! Coinbase subsidy calculation.

pub mod general;
