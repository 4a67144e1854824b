//! Call marshalling.
//!
//! A call fills a fresh argument struct, exports every host object reachable
//! through its pointers into foreign memory, invokes the function and then
//! brings results back:
//!
//! 1. pointer targets in host memory get shadow copies (once per storage, so
//!    aliasing and cycles are preserved) and pointers receive real addresses
//! 2. the argument struct itself is shadowed and the module is invoked
//! 3. the argument struct and every writable shadowed target are copied back
//! 4. pointers the foreign side left alone get their host targets back;
//!    redirected pointers are re-linked to the new address
//!
//! Shadows are released when the call context closes, whatever the outcome.
//! Calls issued before the module is ready are queued and run in order once
//! [`Env::module_ready`] is called.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use typeview_membrane::{
    ByteWindow, LogLevel, MembraneMetrics, Ownership, ShadowRecord, global_metrics,
};

use crate::env::Env;
use crate::error::{Result, ViewError};
use crate::layout::TypeId;
use crate::module::CallFrame;
use crate::structure::{ArgAttributes, Shape, arg_struct, pointer};
use crate::value::Value;
use crate::view::View;

/// A foreign function bound to its argument struct.
#[derive(Debug, Clone)]
pub struct Callable {
    env: Env,
    name: String,
    thunk: usize,
    function: usize,
    args: TypeId,
}

/// Outcome of issuing a call.
#[derive(Debug)]
pub enum Invocation {
    Ready(Value),
    /// Deferred until the module is ready.
    Pending(PendingCall),
}

impl Invocation {
    /// The value of a call that ran immediately.
    pub fn ready(self) -> Option<Value> {
        match self {
            Self::Ready(value) => Some(value),
            Self::Pending(_) => None,
        }
    }
}

#[derive(Default)]
struct PendingState {
    result: Option<Result<Value>>,
    waker: Option<Waker>,
}

/// Result of a deferred call. Resolves once the module is ready and the call
/// has run.
pub struct PendingCall(Rc<RefCell<PendingState>>);

impl fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall")
            .field("settled", &self.is_settled())
            .finish()
    }
}

impl PendingCall {
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.0.borrow().result.is_some()
    }

    /// Take the result without polling. Consumes the handle, so a settled
    /// result is observed exactly once.
    pub fn take(self) -> std::result::Result<Result<Value>, Self> {
        let result = self.0.borrow_mut().result.take();
        result.ok_or(self)
    }
}

impl Future for PendingCall {
    type Output = Result<Value>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.0.borrow_mut();
        match state.result.take() {
            Some(result) => Poll::Ready(result),
            None => {
                state.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

pub(crate) struct QueuedCall {
    callable: Callable,
    view: View,
    attributes: Option<Vec<ArgAttributes>>,
    state: Rc<RefCell<PendingState>>,
}

/// A pointer given a foreign address for the duration of a call.
struct Export {
    pointer: View,
    address: usize,
    length: usize,
    target: Option<View>,
    writable: bool,
}

impl Callable {
    #[must_use]
    pub fn new(env: &Env, name: &str, thunk: usize, function: usize, args: TypeId) -> Self {
        Self {
            env: env.clone(),
            name: name.to_owned(),
            thunk,
            function,
            args,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn args_type(&self) -> TypeId {
        self.args
    }

    /// Issue the call with `args`, in declaration order.
    pub fn call(&self, args: Vec<Value>) -> Result<Invocation> {
        let ty = self.env.ty(self.args)?;
        let Shape::ArgStruct(shape) = &ty.shape else {
            return Err(ViewError::Unsupported(format!(
                "{}: {} is not an argument struct",
                self.name, ty.name
            )));
        };
        let (ty, attributes) = if shape.variadic {
            let extras = args.get(shape.arg_count()..).unwrap_or_default();
            let ty = arg_struct::variadic_type(&self.env, &ty, extras)?;
            let attributes = arg_struct::attributes(&self.env, &ty)?;
            (ty, Some(attributes))
        } else {
            (ty, None)
        };
        let window = ByteWindow::host(ty.byte_size, ty.align);
        let view = View::new(self.env.clone(), ty, window, 1);
        view.assign_value(&Value::List(args))
            .map_err(|err| self.rename(err))?;

        if !self.env.module().is_ready() || self.env.pending_calls() > 0 {
            let state = Rc::new(RefCell::new(PendingState::default()));
            self.env.enqueue(QueuedCall {
                callable: self.clone(),
                view,
                attributes,
                state: Rc::clone(&state),
            });
            MembraneMetrics::inc(&global_metrics().deferred_calls);
            self.env.log(LogLevel::Debug, "call", "defer", Some(self.function), None, "queued", self.name.clone());
            return Ok(Invocation::Pending(PendingCall(state)));
        }
        Ok(Invocation::Ready(self.execute(&view, attributes)?))
    }

    fn rename(&self, err: ViewError) -> ViewError {
        match err {
            ViewError::ArgumentError {
                index, label, source, ..
            } => ViewError::ArgumentError {
                function: self.name.clone(),
                index,
                label,
                source,
            },
            other => other,
        }
    }

    fn execute(&self, view: &View, attributes: Option<Vec<ArgAttributes>>) -> Result<Value> {
        MembraneMetrics::inc(&global_metrics().calls);
        let context = self.env.begin_context();
        let outcome = self.marshal(view, attributes);
        let released = self.release(context);
        self.env.log(
            if outcome.is_ok() { LogLevel::Debug } else { LogLevel::Warn },
            "call",
            "invoke",
            Some(self.function),
            Some(view.window().len()),
            if outcome.is_ok() { "returned" } else { "failed" },
            self.name.clone(),
        );
        let value = outcome?;
        released?;
        Ok(value)
    }

    fn release(&self, context: u64) -> Result<()> {
        let (_pins, shadows) = self.env.end_context(context)?.into_parts();
        let mut first = Ok(());
        for shadow in shadows {
            if let Err(err) = self.env.free(shadow.address)
                && first.is_ok()
            {
                first = Err(err);
            }
        }
        first
    }

    fn marshal(&self, view: &View, attributes: Option<Vec<ArgAttributes>>) -> Result<Value> {
        let mut exports = Vec::new();
        let outcome = export_pointers(&self.env, view, &mut exports)
            .and_then(|()| self.invoke(view, attributes, &exports));
        if outcome.is_err() {
            // Shadows are about to be freed; host pointers must not keep their addresses.
            for export in exports.iter().filter(|e| e.target.is_some()) {
                if let Err(err) = pointer::write_words(&export.pointer, 0, export.length) {
                    self.env.log(LogLevel::Warn, "call", "restore", None, None, "failed", err.to_string());
                }
            }
        }
        outcome
    }

    fn invoke(
        &self,
        view: &View,
        attributes: Option<Vec<ArgAttributes>>,
        exports: &[Export],
    ) -> Result<Value> {
        let module = Rc::clone(self.env.module());
        let memory = module.memory();

        let args_address = shadow(&self.env, view)?;
        let args_size = view.window().len();

        module.invoke(&CallFrame {
            thunk: self.thunk,
            function: self.function,
            args_address,
            args_size,
            attributes,
        })?;

        view.window().copy_from_slice(&memory.read(args_address, args_size)?)?;
        for export in exports.iter().filter(|e| e.writable) {
            if let Some(target) = &export.target {
                let len = target.window().len();
                target.window().copy_from_slice(&memory.read(export.address, len)?)?;
            }
        }
        for export in exports {
            let (address, length) = pointer::read_words(&export.pointer)?;
            match &export.target {
                Some(_) if address == export.address => {
                    pointer::write_words(&export.pointer, 0, export.length)?;
                }
                None if address == export.address && length == export.length => {}
                _ => pointer::relink(&export.pointer, address, length)?,
            }
        }

        let Shape::ArgStruct(shape) = &view.runtime_type().shape else {
            return Ok(Value::Null);
        };
        match shape.members.first() {
            Some(retval) => view.read_member(retval, 0, 0),
            None => Ok(Value::Null),
        }
    }
}

/// Place a host object in foreign memory for the current call. Storage
/// already placed in this call reuses its address.
fn shadow(env: &Env, view: &View) -> Result<usize> {
    let key = view.window().identity();
    if let Some(address) = env.with_context(|cx| cx.address_of(key)).flatten() {
        return Ok(address);
    }
    let len = view.window().len();
    let align = view.runtime_type().align.max(1).next_power_of_two();
    let address = env.module().allocate(len.max(1), align, Ownership::Host)?;
    env.with_context(|cx| {
        cx.add_shadow(ShadowRecord {
            key,
            address,
            len,
            align,
        });
        cx.pin(view.clone());
    });
    env.module().memory().write(address, &view.bytes()?)?;
    Ok(address)
}

/// Give every pointer reachable from `view` a foreign address.
fn export_pointers(env: &Env, view: &View, exports: &mut Vec<Export>) -> Result<()> {
    view.visit_pointers(&mut |p| {
        if p.is_fixed() {
            return Ok(());
        }
        let target = p.pointer_slot().borrow().target.clone();
        let Some(target) = target else {
            let (address, length) = pointer::read_words(p)?;
            exports.push(Export {
                pointer: p.clone(),
                address,
                length,
                target: None,
                writable: false,
            });
            return Ok(());
        };
        let (address, writable) = match target.address() {
            Some(address) => (address, false),
            None => {
                let key = target.window().identity();
                let known = env.with_context(|cx| cx.address_of(key)).flatten();
                let address = match known {
                    Some(address) => address,
                    None => {
                        let len = target.window().len();
                        let align = target.runtime_type().align.max(1).next_power_of_two();
                        let address = env.module().allocate(len.max(1), align, Ownership::Host)?;
                        env.with_context(|cx| {
                            cx.add_shadow(ShadowRecord {
                                key,
                                address,
                                len,
                                align,
                            });
                            cx.pin(target.clone());
                        });
                        export_pointers(env, &target, exports)?;
                        env.module().memory().write(address, &target.bytes()?)?;
                        address
                    }
                };
                let writable = !p.runtime_type().flags.is_const && !target.is_read_only();
                (address, writable)
            }
        };
        pointer::write_words(p, address, target.len())?;
        exports.push(Export {
            pointer: p.clone(),
            address,
            length: target.len(),
            target: Some(target),
            writable,
        });
        Ok(())
    })
}

/// Run queued calls in issue order once the module is ready.
pub(crate) fn flush(env: &Env) -> usize {
    if !env.module().is_ready() {
        return 0;
    }
    let mut count = 0;
    while let Some(queued) = env.dequeue() {
        let result = queued.callable.execute(&queued.view, queued.attributes);
        let waker = {
            let mut state = queued.state.borrow_mut();
            state.result = Some(result);
            state.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        count += 1;
    }
    count
}
