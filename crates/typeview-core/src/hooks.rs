//! Filesystem hook side channel.
//!
//! Foreign code that performs filesystem-style operations can be routed to
//! host handlers. The engine only stores and dispatches handlers; payload
//! shape is a contract between the embedder and the module.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookEvent {
    Open,
    Stat,
    Mkdir,
    Rmdir,
}

impl HookEvent {
    pub const ALL: [Self; 4] = [Self::Open, Self::Stat, Self::Mkdir, Self::Rmdir];

    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|event| event.as_str() == name)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Stat => "stat",
            Self::Mkdir => "mkdir",
            Self::Rmdir => "rmdir",
        }
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type HookHandler = Rc<dyn Fn(&Value) -> Result<Value>>;

/// Installed handlers, one per event.
#[derive(Default, Clone)]
pub struct HookTable {
    handlers: HashMap<HookEvent, HookHandler>,
}

impl fmt::Debug for HookTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

impl HookTable {
    /// Install `handler`, returning the one it replaces.
    pub fn set(&mut self, event: HookEvent, handler: HookHandler) -> Option<HookHandler> {
        self.handlers.insert(event, handler)
    }

    pub fn remove(&mut self, event: HookEvent) -> Option<HookHandler> {
        self.handlers.remove(&event)
    }

    #[must_use]
    pub fn handler(&self, event: HookEvent) -> Option<HookHandler> {
        self.handlers.get(&event).cloned()
    }
}
