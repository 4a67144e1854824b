//! Runtime views: typed handles over a byte window.
//!
//! A view pairs a [`RuntimeType`] with a [`ByteWindow`]. Members are read and
//! written through the window on every access; nested aggregates are
//! materialized lazily as child views over sub-windows and cached by slot, so
//! repeated access hands back the same child.
//!
//! Read-only aliases share the bytes of their origin. Their children are
//! read-only aliases of the origin's children, and pointer state is always
//! taken from the origin.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use typeview_membrane::ByteWindow;

use crate::env::Env;
use crate::error::{Result, ViewError};
use crate::layout::{StructureKind, TypeId};
use crate::normalize;
use crate::structure::members::Member;
use crate::structure::{
    RuntimeType, Shape, arg_struct, array, enumeration, error_set, error_union, optional, pointer,
    primitive, structs, union, vector,
};
use crate::value::Value;

/// Host-side pointer state.
#[derive(Debug, Default, Clone)]
pub(crate) struct PointerSlot {
    /// Current target, as narrowed by `set_length`.
    pub(crate) target: Option<View>,
    /// Target as assigned; bounds later length changes.
    pub(crate) full: Option<View>,
}

impl PointerSlot {
    pub(crate) fn link(&mut self, target: View) {
        self.full = Some(target.clone());
        self.target = Some(target);
    }

    pub(crate) fn unlink(&mut self) {
        self.target = None;
        self.full = None;
    }
}

struct ViewCell {
    env: Env,
    ty: Rc<RuntimeType>,
    window: ByteWindow,
    length: usize,
    children: RefCell<HashMap<usize, View>>,
    pointer: RefCell<PointerSlot>,
    read_only: Cell<bool>,
    origin: Option<View>,
}

/// A typed handle over foreign-layout bytes.
#[derive(Clone)]
pub struct View(Rc<ViewCell>);

impl fmt::Debug for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("View")
            .field("type", &self.0.ty.name)
            .field("len", &self.0.length)
            .field("address", &self.0.window.address())
            .field("read_only", &self.0.read_only.get())
            .finish()
    }
}

impl View {
    pub(crate) fn new(env: Env, ty: Rc<RuntimeType>, window: ByteWindow, length: usize) -> Self {
        Self(Rc::new(ViewCell {
            env,
            ty,
            window,
            length,
            children: RefCell::new(HashMap::new()),
            pointer: RefCell::new(PointerSlot::default()),
            read_only: Cell::new(false),
            origin: None,
        }))
    }

    #[must_use]
    pub fn env(&self) -> &Env {
        &self.0.env
    }

    #[must_use]
    pub fn runtime_type(&self) -> &Rc<RuntimeType> {
        &self.0.ty
    }

    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.0.ty.id
    }

    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.0.ty.name
    }

    #[must_use]
    pub fn kind(&self) -> StructureKind {
        self.0.ty.kind
    }

    #[must_use]
    pub fn window(&self) -> &ByteWindow {
        &self.0.window
    }

    /// Copy of the backing bytes.
    pub fn bytes(&self) -> Result<Vec<u8>> {
        Ok(self.0.window.to_vec()?)
    }

    /// Foreign address, for views over fixed memory.
    #[must_use]
    pub fn address(&self) -> Option<usize> {
        self.0.window.address()
    }

    #[must_use]
    pub fn is_fixed(&self) -> bool {
        self.0.window.is_fixed()
    }

    /// Element count for arrays, slices and vectors; 1 otherwise.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.length
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.length == 0
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.0.read_only.get()
    }

    /// Reject writes through this view and every child, present or future.
    pub fn make_read_only(&self) {
        self.0.read_only.set(true);
        let children: Vec<View> = self.0.children.borrow().values().cloned().collect();
        for child in children {
            child.make_read_only();
        }
    }

    /// A read-only handle sharing this view's bytes.
    #[must_use]
    pub fn read_only_alias(&self) -> View {
        if self.is_read_only() {
            return self.clone();
        }
        Self(Rc::new(ViewCell {
            env: self.0.env.clone(),
            ty: Rc::clone(&self.0.ty),
            window: self.0.window.clone(),
            length: self.0.length,
            children: RefCell::new(HashMap::new()),
            pointer: RefCell::new(PointerSlot::default()),
            read_only: Cell::new(true),
            origin: Some(self.base().clone()),
        }))
    }

    /// True when both handles denote the same typed object.
    #[must_use]
    pub fn same_object(&self, other: &View) -> bool {
        Rc::ptr_eq(&self.base().0, &other.base().0)
            || (self.type_id() == other.type_id()
                && self.len() == other.len()
                && self.0.window.identity() == other.0.window.identity())
    }

    pub(crate) fn base(&self) -> &View {
        self.0.origin.as_ref().unwrap_or(self)
    }

    pub(crate) fn pointer_slot(&self) -> &RefCell<PointerSlot> {
        &self.base().0.pointer
    }

    pub(crate) fn ensure_writable(&self) -> Result<()> {
        if self.is_read_only() {
            return Err(ViewError::ReadOnly {
                type_name: self.type_name().to_owned(),
            });
        }
        Ok(())
    }

    /// Child view of type `ty` over `byte_len` bytes at `byte_offset`, cached under `key`.
    pub(crate) fn child(&self, key: usize, ty: TypeId, byte_offset: usize, byte_len: usize) -> Result<View> {
        if let Some(cached) = self.0.children.borrow().get(&key) {
            return Ok(cached.clone());
        }
        let child = match &self.0.origin {
            Some(origin) => origin.child(key, ty, byte_offset, byte_len)?.read_only_alias(),
            None => {
                let ty = self.0.env.ty(ty)?;
                let window = self.0.window.sub(byte_offset, byte_len)?;
                let length = ty.default_length(byte_len);
                let child = View::new(self.0.env.clone(), ty, window, length);
                if self.is_read_only() {
                    child.make_read_only();
                }
                child
            }
        };
        self.0.children.borrow_mut().insert(key, child.clone());
        Ok(child)
    }

    pub(crate) fn member_child(&self, member: &Member, key: usize, base_bit: usize) -> Result<View> {
        let ty = member.structure.ok_or_else(|| {
            ViewError::Unsupported(format!("{}: member is not an object", self.type_name()))
        })?;
        let (offset, len) = member.byte_range(base_bit);
        self.child(key, ty, offset, len)
    }

    /// Read a member. Value-like children unwrap to their value.
    pub(crate) fn read_member(&self, member: &Member, key: usize, base_bit: usize) -> Result<Value> {
        if !member.is_object() {
            return member.read(&self.0.window, base_bit, self.type_name());
        }
        let child = self.member_child(member, key, base_bit)?;
        if child.runtime_type().is_value_kind() {
            child.value()
        } else {
            Ok(Value::View(child))
        }
    }

    pub(crate) fn write_member(&self, member: &Member, key: usize, base_bit: usize, value: &Value) -> Result<()> {
        if !member.is_object() {
            return member.write(&self.0.window, base_bit, value, self.type_name());
        }
        self.member_child(member, key, base_bit)?.assign_value(value)
    }

    /// The object's value: scalars, enum items and errors for value kinds,
    /// the view itself for aggregates.
    pub fn value(&self) -> Result<Value> {
        match &self.0.ty.shape {
            Shape::Primitive(shape) => primitive::value(self, shape),
            Shape::Enum(shape) => enumeration::value(self, shape),
            Shape::ErrorSet(shape) => error_set::value(self, shape),
            Shape::Optional(shape) => optional::value(self, shape),
            Shape::ErrorUnion(shape) => error_union::value(self, shape),
            Shape::Opaque => Err(ViewError::OpaqueAccess {
                type_name: self.type_name().to_owned(),
            }),
            _ => Ok(Value::View(self.clone())),
        }
    }

    /// Replace the object's contents.
    pub fn assign(&self, value: impl Into<Value>) -> Result<()> {
        self.assign_value(&value.into())
    }

    pub(crate) fn assign_value(&self, value: &Value) -> Result<()> {
        self.ensure_writable()?;
        if let Value::View(src) = value
            && src.type_id() == self.type_id()
            && !matches!(self.0.ty.shape, Shape::Pointer(_))
        {
            return self.copy_from(src);
        }
        match &self.0.ty.shape {
            Shape::Primitive(shape) => primitive::assign(self, shape, value),
            Shape::Array(shape) | Shape::Slice(shape) => array::assign(self, shape, value),
            Shape::Vector(shape) => vector::assign(self, shape, value),
            Shape::Struct(shape) => structs::assign(self, shape, value),
            Shape::Union(shape) => union::assign(self, shape, value),
            Shape::Optional(shape) => optional::assign(self, shape, value),
            Shape::ErrorUnion(shape) => error_union::assign(self, shape, value),
            Shape::ErrorSet(shape) => error_set::assign(self, shape, value),
            Shape::Enum(shape) => enumeration::assign(self, shape, value),
            Shape::Pointer(shape) => pointer::assign(self, shape, value),
            Shape::ArgStruct(shape) => arg_struct::assign(self, shape, value),
            Shape::Opaque => Err(ViewError::OpaqueAccess {
                type_name: self.type_name().to_owned(),
            }),
            Shape::Function { .. } => Err(ViewError::Unsupported(format!(
                "{}: functions cannot be assigned",
                self.type_name()
            ))),
        }
    }

    /// Copy another instance of the same type, re-linking pointers.
    pub fn copy_from(&self, src: &View) -> Result<()> {
        self.ensure_writable()?;
        if src.type_id() != self.type_id() {
            return Err(ViewError::InvalidInitializer {
                type_name: self.type_name().to_owned(),
                expected: format!("object of type {}", self.type_name()),
                received: Value::View(src.clone()).describe(),
            });
        }
        if src.len() != self.len() {
            return Err(ViewError::ArrayLengthMismatch {
                type_name: self.type_name().to_owned(),
                expected: self.len(),
                received: src.len(),
            });
        }
        self.0.window.copy_from(&src.0.window)?;
        if self.0.ty.flags.has_pointer && !self.same_object(src) {
            let mut sources = Vec::new();
            src.visit_pointers(&mut |p| {
                sources.push(p.pointer_slot().borrow().clone());
                Ok(())
            })?;
            let mut sources = sources.into_iter();
            self.visit_pointers(&mut |p| {
                *p.pointer_slot().borrow_mut() = sources.next().unwrap_or_default();
                Ok(())
            })?;
        }
        Ok(())
    }

    /// Named member of a struct, union or argument struct; pointers forward
    /// to their target.
    pub fn get(&self, name: &str) -> Result<Value> {
        match &self.0.ty.shape {
            Shape::Struct(shape) => structs::get(self, shape, name),
            Shape::Union(shape) => union::get(self, shape, name),
            Shape::ArgStruct(shape) => arg_struct::get(self, shape, name),
            Shape::Pointer(_) => self.deref()?.get(name),
            _ => Err(self.no_property(name)),
        }
    }

    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        match &self.0.ty.shape {
            Shape::Struct(shape) => structs::set(self, shape, name, &value),
            Shape::Union(shape) => union::set(self, shape, name, &value),
            Shape::ArgStruct(shape) => arg_struct::set(self, shape, name, &value),
            Shape::Pointer(_) => self.deref()?.set(name, value),
            _ => Err(self.no_property(name)),
        }
    }

    /// Element `index` of an array, slice or vector.
    pub fn at(&self, index: usize) -> Result<Value> {
        match &self.0.ty.shape {
            Shape::Array(shape) | Shape::Slice(shape) => array::at(self, shape, index),
            Shape::Vector(shape) => vector::at(self, shape, index),
            Shape::Pointer(_) => self.deref()?.at(index),
            _ => Err(self.no_property(&index.to_string())),
        }
    }

    pub fn set_at(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        match &self.0.ty.shape {
            Shape::Array(shape) | Shape::Slice(shape) => array::set_at(self, shape, index, &value),
            Shape::Vector(shape) => vector::set_at(self, shape, index, &value),
            Shape::Pointer(_) => self.deref()?.set_at(index, value),
            _ => Err(self.no_property(&index.to_string())),
        }
    }

    /// `(name, value)` pairs in declaration order. A member that fails to
    /// read yields its error without aborting the rest.
    pub fn entries(&self) -> Result<Vec<(String, Result<Value>)>> {
        match &self.0.ty.shape {
            Shape::Struct(shape) => Ok(structs::entries(self, shape)),
            Shape::Union(shape) => Ok(union::entries(self, shape)),
            Shape::ArgStruct(shape) => Ok(arg_struct::entries(self, shape)),
            Shape::Array(_) | Shape::Slice(_) | Shape::Vector(_) => Ok((0..self.len())
                .map(|i| (i.to_string(), self.at(i)))
                .collect()),
            Shape::Pointer(_) => self.deref()?.entries(),
            _ => Err(ViewError::Unsupported(format!(
                "{} has no members",
                self.type_name()
            ))),
        }
    }

    /// Text content of a u8 (UTF-8) or u16 (UTF-16) sequence.
    pub fn string(&self) -> Result<String> {
        match &self.0.ty.shape {
            Shape::Array(shape) | Shape::Slice(shape) => array::string(self, shape),
            Shape::Pointer(_) => self.deref()?.string(),
            _ => Err(ViewError::Unsupported(format!(
                "{} is not a text sequence",
                self.type_name()
            ))),
        }
    }

    /// Pointer target; `None` for null.
    pub fn target(&self) -> Result<Option<View>> {
        match &self.0.ty.shape {
            Shape::Pointer(shape) => pointer::target(self, shape),
            _ => Err(ViewError::Unsupported(format!(
                "{} is not a pointer",
                self.type_name()
            ))),
        }
    }

    /// Change the length of a slice pointer's target.
    pub fn set_length(&self, length: usize) -> Result<()> {
        match &self.0.ty.shape {
            Shape::Pointer(shape) => pointer::set_length(self, shape, length),
            _ => Err(ViewError::Unsupported(format!(
                "{} is not a slice pointer",
                self.type_name()
            ))),
        }
    }

    /// Backing integer of a packed struct.
    pub fn to_int(&self) -> Result<Value> {
        match &self.0.ty.shape {
            Shape::Struct(shape) => structs::to_int(self, shape),
            Shape::Primitive(shape) => primitive::value(self, shape),
            Shape::Enum(shape) => Ok(Value::Int(enumeration::value_of(self, shape)?)),
            _ => Err(ViewError::Unsupported(format!(
                "{} has no backing integer",
                self.type_name()
            ))),
        }
    }

    /// Name of the active member of a union with a selector.
    pub fn active(&self) -> Result<Option<String>> {
        match &self.0.ty.shape {
            Shape::Union(shape) => union::active_name(self, shape),
            _ => Err(ViewError::Unsupported(format!(
                "{} is not a union",
                self.type_name()
            ))),
        }
    }

    /// Plain JSON rendition of the object graph.
    pub fn normalize(&self) -> Result<serde_json::Value> {
        normalize::normalize(self)
    }

    fn deref(&self) -> Result<View> {
        self.target()?.ok_or_else(|| ViewError::NullPointer {
            type_name: self.type_name().to_owned(),
        })
    }

    fn no_property(&self, name: &str) -> ViewError {
        ViewError::NoProperty {
            type_name: self.type_name().to_owned(),
            name: name.to_owned(),
        }
    }

    /// Call `f` on every pointer stored inline in this object. Pointer
    /// targets are not entered.
    pub(crate) fn visit_pointers(&self, f: &mut dyn FnMut(&View) -> Result<()>) -> Result<()> {
        if !self.0.ty.flags.has_pointer && !matches!(self.0.ty.shape, Shape::Pointer(_)) {
            return Ok(());
        }
        match &self.0.ty.shape {
            Shape::Pointer(_) => f(self),
            Shape::Struct(shape) => self.visit_members(shape.members.iter().enumerate(), f),
            Shape::ArgStruct(shape) => self.visit_members(shape.members.iter().enumerate(), f),
            Shape::Optional(shape) => self.visit_members(std::iter::once((0, &shape.value)), f),
            Shape::ErrorUnion(shape) => self.visit_members(std::iter::once((0, &shape.value)), f),
            Shape::Union(shape) => match union::active_index(self, shape)? {
                Some(index) => self.visit_members(std::iter::once((index, &shape.members[index])), f),
                None => Ok(()),
            },
            Shape::Array(shape) | Shape::Slice(shape) if shape.element.is_object() => {
                let stride = shape.stride();
                for index in 0..self.len() {
                    self.member_child(&shape.element, index, index * stride * 8)?
                        .visit_pointers(f)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn visit_members<'m>(
        &self,
        members: impl Iterator<Item = (usize, &'m Member)>,
        f: &mut dyn FnMut(&View) -> Result<()>,
    ) -> Result<()> {
        for (key, member) in members {
            if !member.is_object() {
                continue;
            }
            self.member_child(member, key, 0)?.visit_pointers(f)?;
        }
        Ok(())
    }

    /// Unlink every inline pointer and zero its address words.
    pub(crate) fn clear_pointers(&self) -> Result<()> {
        self.visit_pointers(&mut |p| {
            p.pointer_slot().borrow_mut().unlink();
            pointer::write_words(p, 0, 0)
        })
    }
}

/// Index-based access shared by arrays, slices, vectors and pointers to them.
pub trait Indexable {
    fn get(&self, index: usize) -> Result<Value>;
    fn set(&self, index: usize, value: Value) -> Result<()>;
    fn length(&self) -> usize;
    fn iterate(&self) -> Elements<'_>;
}

impl Indexable for View {
    fn get(&self, index: usize) -> Result<Value> {
        self.at(index)
    }

    fn set(&self, index: usize, value: Value) -> Result<()> {
        self.set_at(index, value)
    }

    fn length(&self) -> usize {
        match &self.0.ty.shape {
            Shape::Pointer(_) => self.target().ok().flatten().map_or(0, |t| t.len()),
            _ => self.len(),
        }
    }

    fn iterate(&self) -> Elements<'_> {
        Elements {
            view: self,
            index: 0,
            length: self.length(),
        }
    }
}

/// Lazy element iterator.
pub struct Elements<'a> {
    view: &'a View,
    index: usize,
    length: usize,
}

impl Iterator for Elements<'_> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.length {
            return None;
        }
        let item = self.view.at(self.index);
        self.index += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.length - self.index;
        (left, Some(left))
    }
}
