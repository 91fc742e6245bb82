//! Stride Evolve - Step-count gamification engine
//!
//! Stride turns daily step totals into an evolution phase that grows with the
//! rolling weekly total and visibly decays when the daily goal is missed:
//! history store → phase calculator → decay engine → change events.
//!
//! ## Modules
//!
//! - **History**: 30-day rolling store of daily step records
//! - **Phase**: Weekly-total thresholds, progress and milestones
//! - **Decay**: Strong / neutral / tired status from consecutive missed days
//! - **Engine**: [`EvolutionProcessor`] wiring the above to a clock and listeners

pub mod clock;
pub mod config;
pub mod decay;
pub mod engine;
pub mod error;
pub mod events;
pub mod history;
pub mod phase;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use clock::{Clock, FixedOffsetClock, ManualClock, SystemClock};
pub use config::EvolutionConfig;
pub use decay::{DecayEngine, Evaluation};
pub use engine::{EvolutionProcessor, EvolutionSnapshot, EvolutionStatus, Update};
pub use error::EvolveError;
pub use events::{EvolutionEvent, SubscriptionId};
pub use history::HistoryStore;
pub use types::{DailyRecord, DayKey, DayView, DecayState, DecayStatus, Phase};

/// Library version
pub const STRIDE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported by diagnostics
pub const PRODUCER_NAME: &str = "stride-evolve";
