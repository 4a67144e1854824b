//! Per-call contexts.
//!
//! A context is opened before a foreign invocation and closed after it. While
//! open it pins every host object the foreign side may observe and records the
//! shadow copies placed in foreign memory. Contexts nest; only the innermost
//! one may be closed, and a closed context hands its pins and shadows back to
//! the caller so nothing leaks into the next one.

use std::collections::HashMap;

use crate::error::MemoryError;
use crate::lifecycle::{LifecycleLog, LifecycleRecord, LogLevel};
use crate::metrics::{MembraneMetrics, global_metrics};

/// A shadow copy of a host object placed in foreign memory for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowRecord {
    /// Identity of the host storage the shadow mirrors.
    pub key: (usize, usize),
    pub address: usize,
    pub len: usize,
    pub align: usize,
}

/// State of one open call.
#[derive(Debug)]
pub struct CallContext<P> {
    id: u64,
    pins: Vec<P>,
    shadows: Vec<ShadowRecord>,
    addresses: HashMap<(usize, usize), usize>,
}

impl<P> CallContext<P> {
    fn new(id: u64) -> Self {
        Self {
            id,
            pins: Vec::new(),
            shadows: Vec::new(),
            addresses: HashMap::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Keep `object` alive until the context ends.
    pub fn pin(&mut self, object: P) {
        MembraneMetrics::inc(&global_metrics().pins);
        self.pins.push(object);
    }

    #[must_use]
    pub fn pins(&self) -> &[P] {
        &self.pins
    }

    /// Record a shadow copy and the address it gives its host storage.
    pub fn add_shadow(&mut self, shadow: ShadowRecord) {
        MembraneMetrics::inc(&global_metrics().shadow_copies);
        self.addresses.insert(shadow.key, shadow.address);
        self.shadows.push(shadow);
    }

    #[must_use]
    pub fn shadows(&self) -> &[ShadowRecord] {
        &self.shadows
    }

    /// Remember the foreign address of storage that needs no shadow.
    pub fn remember(&mut self, key: (usize, usize), address: usize) {
        self.addresses.insert(key, address);
    }

    /// Address already assigned to host storage in this context.
    #[must_use]
    pub fn address_of(&self, key: (usize, usize)) -> Option<usize> {
        self.addresses.get(&key).copied()
    }

    /// Consume the context, yielding pins and shadows for release.
    #[must_use]
    pub fn into_parts(self) -> (Vec<P>, Vec<ShadowRecord>) {
        (self.pins, self.shadows)
    }
}

/// Stack of nested call contexts.
#[derive(Debug)]
pub struct ContextStack<P> {
    stack: Vec<CallContext<P>>,
    next_id: u64,
    log: LifecycleLog,
}

impl<P> Default for ContextStack<P> {
    fn default() -> Self {
        Self {
            stack: Vec::new(),
            next_id: 1,
            log: LifecycleLog::with_capacity(1024),
        }
    }
}

impl<P> ContextStack<P> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a context and return its id.
    pub fn begin(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.stack.push(CallContext::new(id));
        MembraneMetrics::inc(&global_metrics().contexts_opened);
        self.log.record(
            LogLevel::Debug,
            "context",
            "begin",
            None,
            None,
            "open",
            format!("id={id} depth={}", self.stack.len()),
        );
        id
    }

    #[must_use]
    pub fn current(&self) -> Option<&CallContext<P>> {
        self.stack.last()
    }

    pub fn current_mut(&mut self) -> Option<&mut CallContext<P>> {
        self.stack.last_mut()
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Close the innermost context, which must be `id`.
    pub fn end(&mut self, id: u64) -> Result<CallContext<P>, MemoryError> {
        if self.stack.last().map(CallContext::id) != Some(id) {
            self.log.record(
                LogLevel::Error,
                "context",
                "end",
                None,
                None,
                "mismatch",
                format!("id={id} depth={}", self.stack.len()),
            );
            return Err(MemoryError::ContextMismatch { id });
        }
        let context = self.stack.pop().ok_or(MemoryError::ContextMismatch { id })?;
        MembraneMetrics::inc(&global_metrics().contexts_closed);
        self.log.record(
            LogLevel::Debug,
            "context",
            "end",
            None,
            None,
            "closed",
            format!(
                "id={id} pins={} shadows={}",
                context.pins.len(),
                context.shadows.len()
            ),
        );
        Ok(context)
    }

    pub fn drain_logs(&mut self) -> Vec<LifecycleRecord> {
        self.log.drain()
    }
}
