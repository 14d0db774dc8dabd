//! Core liquidation engine logic.
//!
//! This crate provides the stateful pieces of the liquidation bot that
//! don't need an RPC connection of their own:
//! - The risk set of tracked borrowers and their edge-triggered
//!   Safe/Liq state machine
//! - Dirty-user/dirty-reserve queues fed by event listeners
//! - Scan deduplication and weighted RPC rate limiting
//! - The verifier (batched health-factor re-checks) and scheduler
//!   (head loop, hotset prioritization, event coalescing)
//! - The liquidation planner (debt/collateral pair selection and
//!   profitability scoring)
//! - Attempt history and the post-hoc audit classifier
//! - Runtime configuration

pub mod attempt_history;
pub mod audit;
pub mod config;
pub mod dirty_queue;
pub mod executor;
pub mod planner;
pub mod rate_limiter;
pub mod risk_set;
pub mod scan_registry;
pub mod scheduler;
pub mod u256_math;
pub mod verifier;

pub use attempt_history::{AttemptHistory, AttemptRecord, AttemptStats, AttemptStatus};
pub use audit::{AuditListener, AuditNotification, AuditReason, OnChainLiquidationEvent};
pub use config::{config, init_config, BotConfig};
pub use dirty_queue::DirtyQueue;
pub use executor::{ExecutorConfig, LiquidationExecutor};
pub use planner::{CandidatePlan, LiquidationPlanner, PlanError, CLOSE_FACTOR_BPS, HAIRCUT_BPS, TOP_N_PAIRS};
pub use rate_limiter::{AcquirePriority, InFlightLimiter, TokenBucket};
pub use risk_set::{EdgeState, EdgeTransition, HfObservation, RiskSet, TrackedUser};
pub use scan_registry::{ScanKey, ScanRegistry, TriggerKind, DEFAULT_DEDUP_WINDOW};
pub use scheduler::{
    AdaptivePageSizer, EventCoalescer, HeadBlockGate, RotatingCursor, Scheduler, SchedulerConfig,
};
pub use verifier::{Actionable, ScanStats, Verifier, VerifierConfig};
