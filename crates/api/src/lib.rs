//! External service clients (§6 of the engine's interface contracts).
//!
//! This crate provides HTTP-backed implementations of the two pluggable
//! external collaborators the core depends on:
//! - the borrower index (§6.D): resolve the borrower set for a reserve
//! - the swap quote oracle (§6.E): `getSwapCalldata` for the planner's
//!   winning candidate
//!
//! Both are exposed as traits so the source (subgraph, on-chain
//! scanner, alternate aggregator, ...) can be swapped without touching
//! the core.

mod borrower_index;
mod swap;

pub use borrower_index::{BlockAnaliticaBorrowerIndex, BorrowerIndex};
pub use swap::{LiqdSwapOracle, SwapQuote, SwapQuoteOracle, SwapQuoteParams};
