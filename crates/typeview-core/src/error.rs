//! Error taxonomy for views, factories and calls.

use thiserror::Error;
use typeview_membrane::MemoryError;

use crate::value::ForeignError;

/// Family an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Initialization,
    Access,
    Pointer,
    Call,
    Overflow,
    OutOfBound,
    Memory,
    Unsupported,
}

#[derive(Debug, Clone, Error)]
pub enum ViewError {
    // Initialization
    #[error("{type_name}: missing initializer")]
    MissingInitializer { type_name: String },
    #[error("{type_name}: expected {expected}, received {received}")]
    InvalidInitializer {
        type_name: String,
        expected: String,
        received: String,
    },
    #[error("{type_name} has no property \"{name}\"")]
    NoProperty { type_name: String, name: String },
    #[error("{type_name}: missing initializers for {}", members.join(", "))]
    MissingMembers {
        type_name: String,
        members: Vec<String>,
    },
    #[error("{type_name} expects {expected} argument(s), received {received}")]
    ArgumentCountMismatch {
        type_name: String,
        expected: usize,
        received: usize,
    },
    #[error("{type_name}: expected {expected} element(s), received {received}")]
    ArrayLengthMismatch {
        type_name: String,
        expected: usize,
        received: usize,
    },
    #[error("{type_name}: missing sentinel {sentinel}")]
    MissingSentinel { type_name: String, sentinel: i128 },
    #[error("{type_name}: sentinel {sentinel} found at index {index} before the final position {last}")]
    MisplacedSentinel {
        type_name: String,
        sentinel: i128,
        index: usize,
        last: usize,
    },

    // Access
    #[error("{type_name}: cannot modify read-only object")]
    ReadOnly { type_name: String },
    #[error("{type_name}: accessing inactive member \"{member}\" while \"{active}\" is active")]
    InactiveUnionMember {
        type_name: String,
        member: String,
        active: String,
    },
    #[error("{type_name}: null pointer")]
    NullPointer { type_name: String },
    #[error("{type_name} is opaque and its value cannot be accessed")]
    OpaqueAccess { type_name: String },
    #[error("{type_name} is opaque and cannot be constructed")]
    OpaqueConstruction { type_name: String },
    #[error("{type_name}: error {error} is not a member of the set")]
    NotInErrorSet { type_name: String, error: String },
    #[error("{type_name}: no item matching {key}")]
    EnumNotFound { type_name: String, key: String },

    // Pointer
    #[error("{type_name}: cannot cast {received} to a pointer, construct the target explicitly")]
    NoCastingToPointer { type_name: String, received: String },
    #[error("{type_name}: a pointer in fixed memory cannot point at host memory")]
    FixedMemoryTargetRequired { type_name: String },
    #[error("{type_name}: cannot assign a const pointer to a mutable pointer")]
    ConstantConstraint { type_name: String },
    #[error("{type_name}: cannot point a mutable pointer at a read-only object")]
    ReadOnlyTarget { type_name: String },
    #[error("{type_name}: target at {address:#x} is no longer valid")]
    StalePointer { type_name: String, address: usize },

    // Call
    #[error("{function}: argument {index} ({label}): {source}")]
    ArgumentError {
        function: String,
        index: usize,
        label: String,
        #[source]
        source: Box<ViewError>,
    },
    #[error("{0}")]
    Foreign(ForeignError),
    #[error("foreign code exited with code {code}")]
    Exit { code: i32 },

    // Range
    #[error("{type_name}: {value} does not fit in {bits} bits")]
    Overflow {
        type_name: String,
        value: String,
        bits: usize,
    },
    #[error("{type_name}: index {index} is out of bounds (length {length})")]
    OutOfBound {
        type_name: String,
        index: usize,
        length: usize,
    },

    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl ViewError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingInitializer { .. }
            | Self::InvalidInitializer { .. }
            | Self::NoProperty { .. }
            | Self::MissingMembers { .. }
            | Self::ArgumentCountMismatch { .. }
            | Self::ArrayLengthMismatch { .. }
            | Self::MissingSentinel { .. }
            | Self::MisplacedSentinel { .. } => ErrorKind::Initialization,
            Self::ReadOnly { .. }
            | Self::InactiveUnionMember { .. }
            | Self::NullPointer { .. }
            | Self::OpaqueAccess { .. }
            | Self::OpaqueConstruction { .. }
            | Self::NotInErrorSet { .. }
            | Self::EnumNotFound { .. } => ErrorKind::Access,
            Self::NoCastingToPointer { .. }
            | Self::FixedMemoryTargetRequired { .. }
            | Self::ConstantConstraint { .. }
            | Self::ReadOnlyTarget { .. }
            | Self::StalePointer { .. } => ErrorKind::Pointer,
            Self::ArgumentError { .. } | Self::Foreign(_) | Self::Exit { .. } => ErrorKind::Call,
            Self::Overflow { .. } => ErrorKind::Overflow,
            Self::OutOfBound { .. } => ErrorKind::OutOfBound,
            Self::Memory(_) => ErrorKind::Memory,
            Self::Unsupported(_) => ErrorKind::Unsupported,
        }
    }

    /// The foreign error carried by this error, looking through argument wrappers.
    #[must_use]
    pub fn foreign(&self) -> Option<&ForeignError> {
        match self {
            Self::Foreign(err) => Some(err),
            Self::ArgumentError { source, .. } => source.foreign(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ViewError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_group_variants() {
        let err = ViewError::OutOfBound {
            type_name: "[4]u8".into(),
            index: 9,
            length: 4,
        };
        assert_eq!(err.kind(), ErrorKind::OutOfBound);
        assert_eq!(err.to_string(), "[4]u8: index 9 is out of bounds (length 4)");

        let err = ViewError::Overflow {
            type_name: "u8".into(),
            value: "256".into(),
            bits: 8,
        };
        assert_eq!(err.kind(), ErrorKind::Overflow);
    }

    #[test]
    fn argument_errors_name_position() {
        let err = ViewError::ArgumentError {
            function: "hello".into(),
            index: 1,
            label: "count".into(),
            source: Box::new(ViewError::ReadOnly {
                type_name: "[]u8".into(),
            }),
        };
        assert_eq!(
            err.to_string(),
            "hello: argument 1 (count): []u8: cannot modify read-only object"
        );
        assert_eq!(err.kind(), ErrorKind::Call);
    }

    #[test]
    fn missing_members_are_listed() {
        let err = ViewError::MissingMembers {
            type_name: "Point".into(),
            members: vec!["x".into(), "y".into()],
        };
        assert_eq!(err.to_string(), "Point: missing initializers for x, y");
    }
}
