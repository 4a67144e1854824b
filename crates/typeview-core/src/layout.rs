//! Layout descriptors: immutable metadata describing one foreign type.
//!
//! Descriptors are plain serde data so the loader can hand them over as JSON.
//! Member conventions per kind:
//!
//! - array, slice, vector: `members[0]` is the element
//! - pointer: `members[0]` is the target (`structure` names the target type)
//! - optional: `members[0]` value, optional `members[1]` presence flag
//! - error union: `members[0]` value, `members[1]` error number
//! - tagged and bare union: value members, then a member flagged `is_selector`
//! - enum and error set: `members[0]` is the integer representation
//! - arg struct: `members[0]` is the return value, arguments follow
//! - function: `members[0]` refers to the arg struct type

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureKind {
    Primitive,
    Array,
    Struct,
    ExternStruct,
    PackedStruct,
    ArgStruct,
    VariadicStruct,
    ExternUnion,
    BareUnion,
    TaggedUnion,
    ErrorUnion,
    ErrorSet,
    Enum,
    Optional,
    Pointer,
    Slice,
    Vector,
    Opaque,
    Function,
}

impl StructureKind {
    #[must_use]
    pub fn is_struct(self) -> bool {
        matches!(self, Self::Struct | Self::ExternStruct | Self::PackedStruct)
    }

    #[must_use]
    pub fn is_union(self) -> bool {
        matches!(self, Self::ExternUnion | Self::BareUnion | Self::TaggedUnion)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberType {
    Void,
    Bool,
    Int,
    Uint,
    Float,
    /// A nested structure stored inline.
    Object,
    Null,
    Undefined,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct MemberFlags {
    pub is_required: bool,
    pub is_read_only: bool,
    pub is_selector: bool,
    pub is_backing_int: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberDescriptor {
    #[serde(default)]
    pub name: Option<String>,
    pub member_type: MemberType,
    #[serde(default)]
    pub bit_offset: usize,
    pub bit_size: usize,
    #[serde(default)]
    pub byte_size: usize,
    #[serde(default)]
    pub slot: Option<usize>,
    #[serde(default)]
    pub structure: Option<TypeId>,
    #[serde(default)]
    pub flags: MemberFlags,
}

impl MemberDescriptor {
    /// A byte-aligned scalar member.
    #[must_use]
    pub fn scalar(name: &str, member_type: MemberType, byte_offset: usize, bits: usize) -> Self {
        Self {
            name: Some(name.to_owned()),
            member_type,
            bit_offset: byte_offset * 8,
            bit_size: bits,
            byte_size: bits.div_ceil(8),
            slot: None,
            structure: None,
            flags: MemberFlags::default(),
        }
    }

    /// A bit-packed scalar member.
    #[must_use]
    pub fn packed(name: &str, member_type: MemberType, bit_offset: usize, bits: usize) -> Self {
        Self {
            name: Some(name.to_owned()),
            member_type,
            bit_offset,
            bit_size: bits,
            byte_size: 0,
            slot: None,
            structure: None,
            flags: MemberFlags::default(),
        }
    }

    /// An inline nested structure.
    #[must_use]
    pub fn object(name: &str, structure: TypeId, byte_offset: usize, byte_size: usize) -> Self {
        Self {
            name: Some(name.to_owned()),
            member_type: MemberType::Object,
            bit_offset: byte_offset * 8,
            bit_size: byte_size * 8,
            byte_size,
            slot: None,
            structure: Some(structure),
            flags: MemberFlags::default(),
        }
    }

    #[must_use]
    pub fn with_structure(mut self, structure: TypeId) -> Self {
        self.structure = Some(structure);
        self
    }

    #[must_use]
    pub fn with_flags(mut self, flags: MemberFlags) -> Self {
        self.flags = flags;
        self
    }

    #[must_use]
    pub fn unnamed(mut self) -> Self {
        self.name = None;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct StructureFlags {
    /// Contains a pointer somewhere in its tree.
    pub has_pointer: bool,
    /// Pointer to const, or const-qualified data.
    pub is_const: bool,
    /// Pointer may be null.
    pub is_nullable: bool,
    /// Pointer to exactly one item.
    pub is_single: bool,
    /// Pointer to an unknown number of items.
    pub is_multiple: bool,
    /// Pointer carries an explicit length word.
    pub is_slice: bool,
    /// Non-exhaustive enum.
    pub is_open: bool,
    /// The catch-all error set.
    pub is_any: bool,
    /// Struct whose members are positional.
    pub is_tuple: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SentinelDescriptor {
    pub value: i128,
    /// Terminator must appear only at the final position.
    #[serde(default = "default_true")]
    pub is_required: bool,
}

fn default_true() -> bool {
    true
}

/// Named constant attached to a type: enum items and error set members.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StaticItem {
    pub name: String,
    pub value: i128,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StructureDescriptor {
    pub name: String,
    pub kind: StructureKind,
    /// Total size; for slices, the size of one element.
    #[serde(default)]
    pub byte_size: usize,
    #[serde(default = "default_align")]
    pub align: usize,
    #[serde(default)]
    pub flags: StructureFlags,
    /// Element count for arrays and vectors.
    #[serde(default)]
    pub length: Option<usize>,
    #[serde(default)]
    pub members: Vec<MemberDescriptor>,
    /// Default bytes applied before explicit initializers.
    #[serde(default)]
    pub template: Option<Vec<u8>>,
    #[serde(default)]
    pub sentinel: Option<SentinelDescriptor>,
    #[serde(default)]
    pub items: Vec<StaticItem>,
}

fn default_align() -> usize {
    1
}

impl StructureDescriptor {
    #[must_use]
    pub fn new(name: &str, kind: StructureKind, byte_size: usize, align: usize) -> Self {
        Self {
            name: name.to_owned(),
            kind,
            byte_size,
            align,
            flags: StructureFlags::default(),
            length: None,
            members: Vec::new(),
            template: None,
            sentinel: None,
            items: Vec::new(),
        }
    }

    #[must_use]
    pub fn member(mut self, member: MemberDescriptor) -> Self {
        self.members.push(member);
        self
    }

    #[must_use]
    pub fn with_flags(mut self, flags: StructureFlags) -> Self {
        self.flags = flags;
        self
    }

    #[must_use]
    pub fn with_length(mut self, length: usize) -> Self {
        self.length = Some(length);
        self
    }

    #[must_use]
    pub fn with_template(mut self, template: Vec<u8>) -> Self {
        self.template = Some(template);
        self
    }

    #[must_use]
    pub fn with_sentinel(mut self, value: i128, is_required: bool) -> Self {
        self.sentinel = Some(SentinelDescriptor { value, is_required });
        self
    }

    #[must_use]
    pub fn item(mut self, name: &str, value: i128) -> Self {
        self.items.push(StaticItem {
            name: name.to_owned(),
            value,
        });
        self
    }

    /// blake3 digest of the canonical JSON form.
    #[must_use]
    pub fn fingerprint(&self) -> [u8; 32] {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        *blake3::hash(&canonical).as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptors_parse_from_json() {
        let json = r#"{
            "name": "Point",
            "kind": "extern_struct",
            "byte_size": 8,
            "align": 4,
            "members": [
                {"name": "x", "member_type": "int", "bit_offset": 0, "bit_size": 32, "byte_size": 4},
                {"name": "y", "member_type": "int", "bit_offset": 32, "bit_size": 32, "byte_size": 4,
                 "flags": {"is_required": true}}
            ]
        }"#;
        let desc: StructureDescriptor = serde_json::from_str(json).expect("parse");
        assert_eq!(desc.kind, StructureKind::ExternStruct);
        assert_eq!(desc.members.len(), 2);
        assert!(desc.members[1].flags.is_required);
        assert!(!desc.flags.has_pointer);
        assert_eq!(desc.sentinel, None);
    }

    #[test]
    fn fingerprint_tracks_content() {
        let a = StructureDescriptor::new("i32", StructureKind::Primitive, 4, 4)
            .member(MemberDescriptor::scalar("value", MemberType::Int, 0, 32));
        let b = a.clone();
        let c = StructureDescriptor::new("u32", StructureKind::Primitive, 4, 4)
            .member(MemberDescriptor::scalar("value", MemberType::Uint, 0, 32));
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn sentinel_defaults_to_required() {
        let s: SentinelDescriptor = serde_json::from_str(r#"{"value": 0}"#).expect("parse");
        assert!(s.is_required);
    }
}
