//! Module namespaces: exported variables and functions bound by name.
//!
//! A loaded module describes its exports as serde data. Binding defines the
//! exported structures as one batch, places views over the variables and
//! wraps the functions as [`Callable`]s.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::call::{Callable, Invocation};
use crate::env::Env;
use crate::error::{Result, ViewError};
use crate::layout::{StructureDescriptor, TypeId};
use crate::value::Value;
use crate::view::View;

/// Everything a module exports. `structure` fields index `structures`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleExports {
    #[serde(default)]
    pub structures: Vec<StructureDescriptor>,
    #[serde(default)]
    pub variables: Vec<VariableExport>,
    #[serde(default)]
    pub functions: Vec<FunctionExport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableExport {
    pub name: String,
    pub structure: TypeId,
    /// Resolved by name through the module when absent.
    #[serde(default)]
    pub address: Option<usize>,
    #[serde(default)]
    pub is_const: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionExport {
    pub name: String,
    #[serde(default)]
    pub thunk: usize,
    /// Resolved by name through the module when absent.
    #[serde(default)]
    pub function: Option<usize>,
    pub args_structure: TypeId,
}

/// Bound exports of one module.
#[derive(Debug)]
pub struct Namespace {
    env: Env,
    types: BTreeMap<String, TypeId>,
    variables: BTreeMap<String, View>,
    functions: BTreeMap<String, Callable>,
}

impl Namespace {
    pub(crate) fn bind(env: &Env, exports: &ModuleExports) -> Result<Self> {
        let ids = env.define_batch(&exports.structures)?;
        let resolve = |index: TypeId, owner: &str| {
            ids.get(index.0).copied().ok_or_else(|| {
                ViewError::Unsupported(format!("{owner}: no exported structure {}", index.0))
            })
        };
        let address_of = |name: &str, given: Option<usize>| {
            given
                .or_else(|| env.module().resolve_address(name))
                .ok_or_else(|| ViewError::Unsupported(format!("{name}: unresolved export")))
        };

        let types = exports
            .structures
            .iter()
            .zip(&ids)
            .map(|(desc, id)| (desc.name.clone(), *id))
            .collect();

        let mut variables = BTreeMap::new();
        for var in &exports.variables {
            let id = resolve(var.structure, &var.name)?;
            let view = env.view_at(id, address_of(&var.name, var.address)?, None)?;
            if var.is_const {
                view.make_read_only();
            }
            variables.insert(var.name.clone(), view);
        }

        let mut functions = BTreeMap::new();
        for func in &exports.functions {
            let args = resolve(func.args_structure, &func.name)?;
            let function = address_of(&func.name, func.function)?;
            functions.insert(
                func.name.clone(),
                Callable::new(env, &func.name, func.thunk, function, args),
            );
        }

        Ok(Self {
            env: env.clone(),
            types,
            variables,
            functions,
        })
    }

    fn missing(&self, name: &str) -> ViewError {
        ViewError::NoProperty {
            type_name: "namespace".into(),
            name: name.to_owned(),
        }
    }

    #[must_use]
    pub fn env(&self) -> &Env {
        &self.env
    }

    /// Value of an exported variable, or a function's name.
    pub fn get(&self, name: &str) -> Result<Value> {
        if let Some(view) = self.variables.get(name) {
            return view.value();
        }
        if self.functions.contains_key(name) {
            return Ok(Value::String(name.to_owned()));
        }
        Err(self.missing(name))
    }

    /// Assign an exported variable.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.variable(name)?.assign(value)
    }

    pub fn variable(&self, name: &str) -> Result<&View> {
        self.variables.get(name).ok_or_else(|| self.missing(name))
    }

    pub fn function(&self, name: &str) -> Result<&Callable> {
        self.functions.get(name).ok_or_else(|| self.missing(name))
    }

    pub fn call(&self, name: &str, args: Vec<Value>) -> Result<Invocation> {
        self.function(name)?.call(args)
    }

    /// Id of an exported structure.
    #[must_use]
    pub fn type_id(&self, name: &str) -> Option<TypeId> {
        self.types.get(name).copied()
    }

    /// Exported variable and function names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .variables
            .keys()
            .chain(self.functions.keys())
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        names
    }
}
