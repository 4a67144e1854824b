//! Error identity table.
//!
//! Foreign error numbers map to one canonical [`ForeignError`] object for the
//! lifetime of the table; the first definition of a number wins. Error set
//! types record which numbers they contain, which is enough to answer both
//! membership (`is_instance`) and set inclusion (`is_subclass`) questions.
//!
//! The table is an explicit service: every [`crate::Env`] receives one, and
//! environments that should share identities are handed clones of the same
//! registry.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use crate::layout::TypeId;
use crate::value::ForeignError;

#[derive(Debug, Default)]
struct SetEntry {
    numbers: BTreeSet<u32>,
    is_any: bool,
}

#[derive(Debug, Default)]
struct ErrorTable {
    by_number: HashMap<u32, ForeignError>,
    sets: HashMap<TypeId, SetEntry>,
}

/// Shared, clonable error identity registry.
#[derive(Debug, Clone, Default)]
pub struct ErrorRegistry(Rc<RefCell<ErrorTable>>);

impl ErrorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonical error for `number`, creating it under `name` on first sight.
    pub fn intern(&self, number: u32, name: &str) -> ForeignError {
        let mut table = self.0.borrow_mut();
        table
            .by_number
            .entry(number)
            .or_insert_with(|| ForeignError::new(number, name))
            .clone()
    }

    #[must_use]
    pub fn lookup(&self, number: u32) -> Option<ForeignError> {
        self.0.borrow().by_number.get(&number).cloned()
    }

    /// Register the members of error set `ty`, returning their canonical objects.
    pub fn define_set(&self, ty: TypeId, members: &[(String, u32)], is_any: bool) -> Vec<ForeignError> {
        let errors: Vec<ForeignError> = members
            .iter()
            .map(|(name, number)| self.intern(*number, name))
            .collect();
        let mut table = self.0.borrow_mut();
        let entry = table.sets.entry(ty).or_default();
        entry.is_any |= is_any;
        entry.numbers.extend(errors.iter().map(ForeignError::number));
        errors
    }

    /// True when `err` is a member of set `ty`. The catch-all set contains
    /// every interned error.
    #[must_use]
    pub fn is_instance(&self, err: &ForeignError, ty: TypeId) -> bool {
        let table = self.0.borrow();
        let canonical = table
            .by_number
            .get(&err.number())
            .is_some_and(|known| known.same(err));
        if !canonical {
            return false;
        }
        table
            .sets
            .get(&ty)
            .is_some_and(|set| set.is_any || set.numbers.contains(&err.number()))
    }

    /// True when every member of `sub` is also a member of `sup`.
    #[must_use]
    pub fn is_subclass(&self, sub: TypeId, sup: TypeId) -> bool {
        if sub == sup {
            return true;
        }
        let table = self.0.borrow();
        let (Some(sub_set), Some(sup_set)) = (table.sets.get(&sub), table.sets.get(&sup)) else {
            return false;
        };
        if sup_set.is_any {
            return true;
        }
        !sub_set.is_any && sub_set.numbers.is_subset(&sup_set.numbers)
    }

    /// Member of set `ty` named `name`.
    #[must_use]
    pub fn by_name(&self, ty: TypeId, name: &str) -> Option<ForeignError> {
        let table = self.0.borrow();
        let set = table.sets.get(&ty)?;
        table
            .by_number
            .values()
            .find(|err| err.name() == name && (set.is_any || set.numbers.contains(&err.number())))
            .cloned()
    }

    /// Errors of set `ty` in number order.
    #[must_use]
    pub fn members(&self, ty: TypeId) -> Vec<ForeignError> {
        let table = self.0.borrow();
        let Some(set) = table.sets.get(&ty) else {
            return Vec::new();
        };
        if set.is_any {
            let mut all: Vec<ForeignError> = table.by_number.values().cloned().collect();
            all.sort_by_key(ForeignError::number);
            return all;
        }
        set.numbers
            .iter()
            .filter_map(|n| table.by_number.get(n).cloned())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.borrow().by_number.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
