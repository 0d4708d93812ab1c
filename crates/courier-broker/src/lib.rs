//! Courier Broker
//!
//! The concurrent persistence pipeline in front of [`courier_storage`], and the
//! facade the transport layer talks to.
//!
//! ## Components
//!
//! - [`LoadMonitor`]: sliding-window request rate
//! - [`BatchAggregator`]: per-operation buffers with size and time flush triggers
//! - [`RetentionReaper`]: load-gated row caps per table
//! - [`Broker`]: validation, buffering, reads and fanout events
//! - [`BrokerRuntime`]: startup and ordered shutdown of all of the above
//!
//! ## Data Flow
//!
//! ```text
//! transport ──> Broker ──> LoadMonitor.record_request()
//!                  │
//!                  └──> BatchAggregator.add() ──flush──> WriteSerializer
//!
//! RetentionReaper ──(low load only)──> WriteSerializer
//! ```

pub mod batch;
pub mod broker;
pub mod config;
pub mod error;
pub mod events;
pub mod load;
pub mod operation;
pub mod records;
pub mod retention;
pub mod runtime;

pub use batch::{BatchAggregator, BatchMetrics};
pub use broker::Broker;
pub use config::{BatchConfig, BrokerConfig, RetentionConfig, TableCaps};
pub use error::{BrokerError, Result};
pub use events::{BrokerEvent, EmitTarget, Envelope, EventBus, EventSink};
pub use load::LoadMonitor;
pub use operation::{FlushReason, OperationType, WriteOperation};
pub use records::{
    ClientBinding, ConsumptionRecord, GraphLink, GraphState, LinkKind, MessageRecord, Payload,
    Subscription,
};
pub use retention::{CleanupOutcome, RetentionReaper};
pub use runtime::BrokerRuntime;
