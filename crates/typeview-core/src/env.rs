//! The environment: one loaded module plus everything defined against it.
//!
//! An [`Env`] owns the type table, the error registry, the call-context
//! stack, the deferred-call queue and installed hooks. It is a cheap handle;
//! every view keeps a clone.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;

use typeview_membrane::{
    ByteWindow, CallContext, ContextStack, LifecycleLog, LifecycleRecord, LogLevel, MembraneConfig,
    Ownership,
};

use crate::call::{self, QueuedCall};
use crate::error::{Result, ViewError};
use crate::error_registry::ErrorRegistry;
use crate::hooks::{HookEvent, HookHandler, HookTable};
use crate::layout::{StructureDescriptor, TypeId};
use crate::module::ForeignModule;
use crate::namespace::{ModuleExports, Namespace};
use crate::structure::{self, DefineContext, RuntimeType, Shape, enumeration};
use crate::value::{EnumItem, ForeignError, Value};
use crate::view::View;

struct EnvState {
    module: Rc<dyn ForeignModule>,
    config: MembraneConfig,
    types: RefCell<Vec<Rc<RuntimeType>>>,
    fingerprints: RefCell<HashMap<[u8; 32], TypeId>>,
    errors: ErrorRegistry,
    contexts: RefCell<ContextStack<View>>,
    pending: RefCell<VecDeque<QueuedCall>>,
    hooks: RefCell<HookTable>,
    log: RefCell<LifecycleLog>,
}

#[derive(Clone)]
pub struct Env(Rc<EnvState>);

impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Env")
            .field("types", &self.0.types.borrow().len())
            .field("errors", &self.0.errors.len())
            .field("pending", &self.0.pending.borrow().len())
            .field("config", &self.0.config)
            .finish()
    }
}

impl Env {
    pub fn new<M: ForeignModule + 'static>(module: Rc<M>, config: MembraneConfig) -> Self {
        Self::with_errors(module, config, ErrorRegistry::new())
    }

    /// Environment sharing error identities through `errors`.
    pub fn with_errors<M: ForeignModule + 'static>(
        module: Rc<M>,
        config: MembraneConfig,
        errors: ErrorRegistry,
    ) -> Self {
        Self(Rc::new(EnvState {
            module,
            config,
            types: RefCell::new(Vec::new()),
            fingerprints: RefCell::new(HashMap::new()),
            errors,
            contexts: RefCell::new(ContextStack::new()),
            pending: RefCell::new(VecDeque::new()),
            hooks: RefCell::new(HookTable::default()),
            log: RefCell::new(LifecycleLog::with_capacity(1024)),
        }))
    }

    #[must_use]
    pub fn module(&self) -> &Rc<dyn ForeignModule> {
        &self.0.module
    }

    #[must_use]
    pub fn config(&self) -> MembraneConfig {
        self.0.config
    }

    #[must_use]
    pub fn errors(&self) -> &ErrorRegistry {
        &self.0.errors
    }

    #[must_use]
    pub fn type_count(&self) -> usize {
        self.0.types.borrow().len()
    }

    pub(crate) fn log(
        &self,
        level: LogLevel,
        symbol: &'static str,
        event: &'static str,
        address: Option<usize>,
        size: Option<usize>,
        outcome: &'static str,
        details: impl Into<String>,
    ) {
        self.0
            .log
            .borrow_mut()
            .record(level, symbol, event, address, size, outcome, details);
    }

    /// Define one type. Structure references are absolute type ids.
    /// A descriptor identical to an earlier one yields the earlier id.
    pub fn define(&self, desc: &StructureDescriptor) -> Result<TypeId> {
        let fingerprint = desc.fingerprint();
        if let Some(id) = self.0.fingerprints.borrow().get(&fingerprint) {
            return Ok(*id);
        }
        let id = TypeId(self.type_count());
        let ty = structure::build(desc, &self.define_context(id))?;
        self.0.types.borrow_mut().push(Rc::new(ty));
        self.0.fingerprints.borrow_mut().insert(fingerprint, id);
        self.log(LogLevel::Debug, "define", "type", None, Some(desc.byte_size), "defined", format!("id={} name={}", id.0, desc.name));
        Ok(id)
    }

    /// Define a group of types whose structure references are indices into
    /// `descs`, so members may refer forward or to their own type.
    ///
    /// Descriptors without references are deduplicated against existing
    /// types. Nothing is registered unless every descriptor compiles.
    pub fn define_batch(&self, descs: &[StructureDescriptor]) -> Result<Vec<TypeId>> {
        let base = self.type_count();
        let mut ids = Vec::with_capacity(descs.len());
        let mut fresh = Vec::new();
        for desc in descs {
            let leaf = desc.members.iter().all(|m| m.structure.is_none());
            let known = leaf
                .then(|| self.0.fingerprints.borrow().get(&desc.fingerprint()).copied())
                .flatten();
            match known {
                Some(id) => ids.push(id),
                None => {
                    ids.push(TypeId(base + fresh.len()));
                    fresh.push(desc);
                }
            }
        }
        let mut built = Vec::with_capacity(fresh.len());
        for (offset, desc) in fresh.iter().enumerate() {
            let mut desc = (*desc).clone();
            for member in &mut desc.members {
                if let Some(TypeId(index)) = member.structure {
                    let id = ids.get(index).copied().ok_or_else(|| {
                        ViewError::Unsupported(format!(
                            "{}: reference to batch entry {index} of {}",
                            desc.name,
                            descs.len()
                        ))
                    })?;
                    member.structure = Some(id);
                }
            }
            let id = TypeId(base + offset);
            built.push((desc.fingerprint(), Rc::new(structure::build(&desc, &self.define_context(id))?)));
        }
        let mut types = self.0.types.borrow_mut();
        let mut fingerprints = self.0.fingerprints.borrow_mut();
        for (fingerprint, ty) in built {
            fingerprints.entry(fingerprint).or_insert(ty.id);
            types.push(ty);
        }
        drop((types, fingerprints));
        self.log(LogLevel::Debug, "define", "batch", None, None, "defined", format!("count={} base={base}", descs.len()));
        Ok(ids)
    }

    fn define_context(&self, id: TypeId) -> DefineContext<'_> {
        DefineContext {
            id,
            little_endian: self.0.config.endianness.is_little(),
            errors: &self.0.errors,
        }
    }

    pub fn ty(&self, id: TypeId) -> Result<Rc<RuntimeType>> {
        self.0
            .types
            .borrow()
            .get(id.0)
            .cloned()
            .ok_or_else(|| ViewError::Unsupported(format!("unknown type id {}", id.0)))
    }

    /// Most recently defined type called `name`.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<TypeId> {
        self.0
            .types
            .borrow()
            .iter()
            .rev()
            .find(|ty| ty.name == name)
            .map(|ty| ty.id)
    }

    /// Construct an instance in host memory.
    pub fn create(&self, id: TypeId, init: impl Into<Value>) -> Result<View> {
        structure::construct(self, self.ty(id)?, &init.into(), false)
    }

    /// Construct an instance in fixed foreign memory.
    pub fn create_fixed(&self, id: TypeId, init: impl Into<Value>) -> Result<View> {
        structure::construct(self, self.ty(id)?, &init.into(), true)
    }

    /// View over foreign memory at `address`. `length` is the element count
    /// for slices and ignored otherwise.
    pub fn view_at(&self, id: TypeId, address: usize, length: Option<usize>) -> Result<View> {
        let ty = self.ty(id)?;
        let length = length.unwrap_or_else(|| ty.default_length(ty.byte_size));
        let window = ByteWindow::fixed_tracked(
            self.0.module.memory(),
            self.0.module.registry(),
            address,
            ty.instance_size(length),
        );
        Ok(View::new(self.clone(), ty, window, length))
    }

    /// View over a private copy of `bytes`.
    pub fn from_bytes(&self, id: TypeId, bytes: Vec<u8>) -> Result<View> {
        let ty = self.ty(id)?;
        let length = ty.default_length(bytes.len());
        if ty.instance_size(length) != bytes.len() {
            return Err(ViewError::ArrayLengthMismatch {
                type_name: ty.name.clone(),
                expected: ty.instance_size(length),
                received: bytes.len(),
            });
        }
        let window = ByteWindow::host_from(bytes, ty.align);
        Ok(View::new(self.clone(), ty, window, length))
    }

    /// Fresh zeroed storage; fixed storage is foreign-owned and address-stable.
    pub fn allocate(&self, size: usize, align: usize, fixed: bool) -> Result<ByteWindow> {
        if !fixed {
            return Ok(ByteWindow::host(size, align));
        }
        let address = self
            .0
            .module
            .allocate(size.max(1), align.max(1).next_power_of_two(), Ownership::Fixed)?;
        self.log(LogLevel::Trace, "allocate", "fixed", Some(address), Some(size), "placed", "");
        Ok(ByteWindow::fixed_tracked(
            self.0.module.memory(),
            self.0.module.registry(),
            address,
            size,
        ))
    }

    pub fn free(&self, address: usize) -> Result<()> {
        Ok(self.0.module.free(address)?)
    }

    /// Item of enum `id` for an item, name or integer.
    pub fn enum_item(&self, id: TypeId, key: impl Into<Value>) -> Result<EnumItem> {
        let ty = self.ty(id)?;
        let Shape::Enum(shape) = &ty.shape else {
            return Err(ViewError::Unsupported(format!("{} is not an enum", ty.name)));
        };
        enumeration::cast(shape, ty.id, &ty.name, &key.into())
    }

    /// Member of error set `id` for an error, name or number.
    pub fn error_of(&self, id: TypeId, key: impl Into<Value>) -> Result<ForeignError> {
        let ty = self.ty(id)?;
        if !matches!(ty.shape, Shape::ErrorSet(_)) {
            return Err(ViewError::Unsupported(format!("{} is not an error set", ty.name)));
        }
        let key = key.into();
        let found = match &key {
            Value::Error(err) => Some(err.clone()),
            Value::String(name) => self.0.errors.by_name(id, name),
            other => other
                .as_int()
                .and_then(|n| u32::try_from(n).ok())
                .and_then(|n| self.0.errors.lookup(n)),
        };
        found
            .filter(|err| self.0.errors.is_instance(err, id))
            .ok_or_else(|| ViewError::NotInErrorSet {
                type_name: ty.name.clone(),
                error: match &key {
                    Value::Error(err) => err.name().to_owned(),
                    Value::String(name) => name.clone(),
                    other => other.describe(),
                },
            })
    }

    /// True when every member of error set `sub` belongs to `sup`.
    #[must_use]
    pub fn is_error_subset(&self, sub: TypeId, sup: TypeId) -> bool {
        self.0.errors.is_subclass(sub, sup)
    }

    pub(crate) fn begin_context(&self) -> u64 {
        self.0.contexts.borrow_mut().begin()
    }

    pub(crate) fn end_context(&self, id: u64) -> Result<CallContext<View>> {
        Ok(self.0.contexts.borrow_mut().end(id)?)
    }

    /// Run `f` on the innermost open context.
    pub(crate) fn with_context<R>(&self, f: impl FnOnce(&mut CallContext<View>) -> R) -> Option<R> {
        self.0.contexts.borrow_mut().current_mut().map(f)
    }

    #[must_use]
    pub fn context_depth(&self) -> usize {
        self.0.contexts.borrow().depth()
    }

    pub(crate) fn enqueue(&self, call: QueuedCall) {
        self.0.pending.borrow_mut().push_back(call);
    }

    pub(crate) fn dequeue(&self) -> Option<QueuedCall> {
        self.0.pending.borrow_mut().pop_front()
    }

    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.0.pending.borrow().len()
    }

    /// Run calls deferred while the module was not ready, in issue order.
    /// Returns how many ran.
    pub fn module_ready(&self) -> usize {
        call::flush(self)
    }

    /// Bind a module's exports into a namespace.
    pub fn bind(&self, exports: &ModuleExports) -> Result<Namespace> {
        Namespace::bind(self, exports)
    }

    /// Install a filesystem hook, returning the handler it replaces.
    pub fn on(&self, event: HookEvent, handler: HookHandler) -> Option<HookHandler> {
        self.0.hooks.borrow_mut().set(event, handler)
    }

    /// Route a filesystem-style request to its hook. `None` when no handler
    /// is installed.
    pub fn dispatch_hook(&self, event: HookEvent, payload: &Value) -> Option<Result<Value>> {
        let handler = self.0.hooks.borrow().handler(event)?;
        self.log(LogLevel::Trace, "hook", "dispatch", None, None, "handled", event.as_str());
        Some(handler(payload))
    }

    /// Drain lifecycle records of definitions, calls and contexts.
    pub fn drain_logs(&self) -> Vec<LifecycleRecord> {
        let mut records = self.0.log.borrow_mut().drain();
        records.extend(self.0.contexts.borrow_mut().drain_logs());
        records
    }
}
