//! The capability set a loaded foreign module provides, and an in-process
//! implementation whose functions are Rust closures over linear memory.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::RwLock;
use typeview_membrane::linear::{word_from_bytes, word_to_bytes};
use typeview_membrane::{
    AllocationRegistry, ForeignHeap, LinearMemory, MembraneConfig, MemoryError, Ownership,
};

use crate::error::{Result, ViewError};
use crate::structure::ArgAttributes;

/// One invocation request handed to the module.
#[derive(Debug, Clone)]
pub struct CallFrame {
    pub thunk: usize,
    pub function: usize,
    /// Address of the argument struct in linear memory.
    pub args_address: usize,
    pub args_size: usize,
    /// Per-slot layout, for variadic calls.
    pub attributes: Option<Vec<ArgAttributes>>,
}

/// What the view engine needs from a loaded module.
pub trait ForeignModule {
    fn memory(&self) -> Arc<LinearMemory>;

    fn registry(&self) -> Arc<AllocationRegistry>;

    fn allocate(&self, size: usize, align: usize, ownership: Ownership) -> std::result::Result<usize, MemoryError>;

    fn free(&self, address: usize) -> std::result::Result<(), MemoryError>;

    /// Run the function; results are written into the argument struct.
    fn invoke(&self, frame: &CallFrame) -> Result<()>;

    /// False while the module is still instantiating.
    fn is_ready(&self) -> bool {
        true
    }

    fn resolve_address(&self, name: &str) -> Option<usize>;
}

type HostedFn = Arc<dyn Fn(&HostedCall<'_>) -> Result<()> + Send + Sync>;

/// A module backed by a foreign heap in process, with closures standing in
/// for compiled functions.
pub struct HostedModule {
    heap: ForeignHeap,
    config: MembraneConfig,
    functions: RwLock<HashMap<usize, HostedFn>>,
    exports: RwLock<HashMap<String, usize>>,
    next_function: AtomicUsize,
    ready: AtomicBool,
}

impl std::fmt::Debug for HostedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostedModule")
            .field("functions", &self.functions.read().len())
            .field("exports", &self.exports.read().len())
            .field("ready", &self.ready.load(Ordering::Relaxed))
            .finish()
    }
}

impl HostedModule {
    /// Ready module with one page of linear memory.
    #[must_use]
    pub fn new(config: MembraneConfig) -> Self {
        let memory = Arc::new(LinearMemory::new(1, config.page_size));
        let registry = Arc::new(AllocationRegistry::new());
        Self {
            heap: ForeignHeap::new(memory, registry),
            config,
            functions: RwLock::new(HashMap::new()),
            exports: RwLock::new(HashMap::new()),
            next_function: AtomicUsize::new(1),
            ready: AtomicBool::new(true),
        }
    }

    /// Module that reports not ready until [`HostedModule::set_ready`].
    #[must_use]
    pub fn pending(config: MembraneConfig) -> Self {
        let module = Self::new(config);
        module.ready.store(false, Ordering::Release);
        module
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn heap(&self) -> &ForeignHeap {
        &self.heap
    }

    /// Register `f` under `name` and return its function address.
    pub fn register<F>(&self, name: &str, f: F) -> usize
    where
        F: Fn(&HostedCall<'_>) -> Result<()> + Send + Sync + 'static,
    {
        let address = self.next_function.fetch_add(1, Ordering::Relaxed);
        self.functions.write().insert(address, Arc::new(f));
        self.export(name, address);
        address
    }

    /// Publish `address` under `name`.
    pub fn export(&self, name: &str, address: usize) {
        self.exports.write().insert(name.to_owned(), address);
    }

    /// Allocate fixed memory holding `bytes`, as a static variable would.
    pub fn place(&self, bytes: &[u8], align: usize) -> std::result::Result<usize, MemoryError> {
        let address = self.heap.allocate(bytes.len(), align, Ownership::Fixed)?;
        self.heap.memory().write(address, bytes)?;
        Ok(address)
    }
}

impl ForeignModule for HostedModule {
    fn memory(&self) -> Arc<LinearMemory> {
        Arc::clone(self.heap.memory())
    }

    fn registry(&self) -> Arc<AllocationRegistry> {
        Arc::clone(self.heap.registry())
    }

    fn allocate(&self, size: usize, align: usize, ownership: Ownership) -> std::result::Result<usize, MemoryError> {
        self.heap.allocate(size, align, ownership)
    }

    fn free(&self, address: usize) -> std::result::Result<(), MemoryError> {
        self.heap.free(address)
    }

    fn invoke(&self, frame: &CallFrame) -> Result<()> {
        let function = self
            .functions
            .read()
            .get(&frame.function)
            .cloned()
            .ok_or_else(|| ViewError::Unsupported(format!("no function at {:#x}", frame.function)))?;
        function(&HostedCall {
            module: self,
            frame,
        })
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn resolve_address(&self, name: &str) -> Option<usize> {
        self.exports.read().get(name).copied()
    }
}

/// The view a hosted function gets of its invocation.
pub struct HostedCall<'a> {
    module: &'a HostedModule,
    frame: &'a CallFrame,
}

impl HostedCall<'_> {
    #[must_use]
    pub fn frame(&self) -> &CallFrame {
        self.frame
    }

    #[must_use]
    pub fn module(&self) -> &HostedModule {
        self.module
    }

    fn little_endian(&self) -> bool {
        self.module.config.endianness.is_little()
    }

    /// Bytes at `offset` inside the argument struct.
    pub fn arg_bytes(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        Ok(self.module.heap.memory().read(self.frame.args_address + offset, len)?)
    }

    pub fn write_arg_bytes(&self, offset: usize, bytes: &[u8]) -> Result<()> {
        Ok(self.module.heap.memory().write(self.frame.args_address + offset, bytes)?)
    }

    /// Unsigned integer of `size` bytes inside the argument struct.
    pub fn arg_uint(&self, offset: usize, size: usize) -> Result<u64> {
        Ok(word_from_bytes(&self.arg_bytes(offset, size)?, self.little_endian()))
    }

    pub fn set_arg_uint(&self, offset: usize, size: usize, value: u64) -> Result<()> {
        self.write_arg_bytes(offset, &word_to_bytes(value, size, self.little_endian()))
    }

    /// Address word inside the argument struct.
    pub fn arg_address(&self, offset: usize) -> Result<usize> {
        let word = self.arg_uint(offset, self.module.config.address_size)?;
        usize::try_from(word).map_err(|_| ViewError::Unsupported(format!("address {word:#x}")))
    }

    pub fn read(&self, address: usize, len: usize) -> Result<Vec<u8>> {
        Ok(self.module.heap.memory().read(address, len)?)
    }

    pub fn write(&self, address: usize, bytes: &[u8]) -> Result<()> {
        Ok(self.module.heap.memory().write(address, bytes)?)
    }

    /// Terminate the call the way a foreign `exit(code)` would.
    pub fn exit(&self, code: i32) -> Result<()> {
        Err(ViewError::Exit { code })
    }
}
