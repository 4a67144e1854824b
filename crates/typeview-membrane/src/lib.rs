//! Memory governance membrane for typeview.
//!
//! This crate owns everything that touches raw bytes on behalf of the typed
//! view engine: the foreign linear memory, host-owned buffers, the windows
//! views read and write through, and the bookkeeping that keeps foreign
//! addresses honest across a call.
//!
//! # Architecture
//!
//! - **Linear memory** (`linear`): foreign address space that can grow; growth
//!   detaches the previous backing buffer so stale handles are detectable
//! - **Byte windows** (`window`): host-owned or fixed (foreign-owned) slices
//!   that re-resolve themselves after the linear memory was invalidated
//! - **Foreign heap** (`heap`): first-fit allocator inside linear memory
//! - **Allocation registry** (`registry`): ownership tagging, generations and
//!   temporal state for every foreign allocation
//! - **Call contexts** (`context`): per-invocation pins and shadow copies
//! - **Block copy** (`copy`): chunked copy/reset primitives
//! - **Configuration** (`config`): runtime safety level and target layout
//! - **Metrics** (`metrics`) and **lifecycle logs** (`lifecycle`)

#![deny(unsafe_code)]

pub mod config;
pub mod context;
pub mod copy;
pub mod error;
pub mod heap;
pub mod lifecycle;
pub mod linear;
pub mod metrics;
pub mod registry;
pub mod window;

pub use config::{Endianness, MembraneConfig, SafetyLevel, safety_level};
pub use context::{CallContext, ContextStack, ShadowRecord};
pub use error::MemoryError;
pub use heap::ForeignHeap;
pub use lifecycle::{LifecycleLog, LifecycleRecord, LogLevel};
pub use linear::{LinearMemory, MemoryBuffer};
pub use metrics::{MembraneMetrics, MetricsSnapshot, global_metrics};
pub use registry::{AddressFacts, AllocationMeta, AllocationRegistry, Ownership, TemporalState};
pub use window::{ByteWindow, FixedRegion, HostBuffer};
