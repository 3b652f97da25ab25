//! Runtime type table.
//!
//! Every value that crosses the call boundary is tagged with a `TypeTag`,
//! a process-unique integer handed out by this table. Tags form a shallow
//! hierarchy: each concrete tag has a fundamental ancestor that selects
//! its conversion rule (all enum types share the enum fundamental, and so
//! on). The table is populated once on first use and lives for the
//! process, which matches the runtime's own lifetime.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};

/// Opaque, process-unique identifier for a runtime type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TypeTag(pub u32);

impl TypeTag {
    /// The null tag, returned by failed lookups on the C-style surface.
    pub const NONE: TypeTag = TypeTag(0);
}

/// Root category a concrete tag belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Fundamental {
    Bool,
    Int,
    Double,
    Str,
    RefStr,
    Enum,
    Flags,
    Object,
    ArrayInt,
    ArrayDouble,
    ArrayImage,
    Blob,
}

/// Per-parameter semantic flags from the runtime argument tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ArgumentFlags(pub u32);

impl ArgumentFlags {
    pub const NONE: ArgumentFlags = ArgumentFlags(0);
    pub const REQUIRED: ArgumentFlags = ArgumentFlags(1);
    pub const CONSTRUCT: ArgumentFlags = ArgumentFlags(2);
    pub const SET_ONCE: ArgumentFlags = ArgumentFlags(4);
    pub const SET_ALWAYS: ArgumentFlags = ArgumentFlags(8);
    pub const INPUT: ArgumentFlags = ArgumentFlags(16);
    pub const OUTPUT: ArgumentFlags = ArgumentFlags(32);
    pub const DEPRECATED: ArgumentFlags = ArgumentFlags(64);
    pub const MODIFY: ArgumentFlags = ArgumentFlags(128);

    #[inline]
    pub const fn with(self, other: ArgumentFlags) -> ArgumentFlags {
        ArgumentFlags(self.0 | other.0)
    }

    #[inline]
    pub const fn contains(self, other: ArgumentFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for ArgumentFlags {
    type Output = ArgumentFlags;

    fn bitor(self, rhs: ArgumentFlags) -> ArgumentFlags {
        self.with(rhs)
    }
}

/// Operation-level flags.
pub const OPERATION_DEPRECATED: u32 = 8;

struct TypeEntry {
    name: String,
    fundamental: Fundamental,
    /// Symbolic member table for enum and flags types.
    members: Vec<(String, i32)>,
}

struct TypeTable {
    by_name: DashMap<String, TypeTag>,
    entries: DashMap<TypeTag, TypeEntry>,
    next: AtomicU32,
}

impl TypeTable {
    fn register(&self, name: &str, fundamental: Fundamental, members: &[(&str, i32)]) -> TypeTag {
        if let Some(existing) = self.by_name.get(name) {
            return *existing;
        }
        let tag = TypeTag(self.next.fetch_add(1, Ordering::SeqCst));
        self.entries.insert(
            tag,
            TypeEntry {
                name: name.to_string(),
                fundamental,
                members: members
                    .iter()
                    .map(|(nick, value)| (nick.to_string(), *value))
                    .collect(),
            },
        );
        self.by_name.insert(name.to_string(), tag);
        tag
    }

    fn bootstrap() -> TypeTable {
        let table = TypeTable {
            by_name: DashMap::new(),
            entries: DashMap::new(),
            next: AtomicU32::new(1),
        };

        // fundamentals are themselves types; their fundamental is themselves
        table.register("bool", Fundamental::Bool, &[]);
        table.register("int", Fundamental::Int, &[]);
        table.register("double", Fundamental::Double, &[]);
        table.register("string", Fundamental::Str, &[]);
        table.register("refstr", Fundamental::RefStr, &[]);
        table.register("enum", Fundamental::Enum, &[]);
        table.register("flags", Fundamental::Flags, &[]);
        table.register("object", Fundamental::Object, &[]);
        table.register("array-int", Fundamental::ArrayInt, &[]);
        table.register("array-double", Fundamental::ArrayDouble, &[]);
        table.register("array-image", Fundamental::ArrayImage, &[]);
        table.register("blob", Fundamental::Blob, &[]);

        table.register("Image", Fundamental::Object, &[]);

        table.register(
            "BandFormat",
            Fundamental::Enum,
            &[
                ("uchar", 0),
                ("char", 1),
                ("ushort", 2),
                ("short", 3),
                ("uint", 4),
                ("int", 5),
                ("float", 6),
                ("double", 7),
            ],
        );
        table.register(
            "Extend",
            Fundamental::Enum,
            &[("black", 0), ("copy", 1), ("white", 2), ("background", 3)],
        );
        table.register(
            "Angle",
            Fundamental::Enum,
            &[("d0", 0), ("d90", 1), ("d180", 2), ("d270", 3)],
        );
        table.register(
            "Direction",
            Fundamental::Enum,
            &[("horizontal", 0), ("vertical", 1)],
        );
        table.register(
            "OperationFlags",
            Fundamental::Flags,
            &[("none", 0), ("sequential", 1), ("nocache", 4), ("deprecated", 8)],
        );

        table
    }
}

static TABLE: Lazy<TypeTable> = Lazy::new(TypeTable::bootstrap);

/// Look up a tag by type name. Returns `None` for unknown names.
pub fn type_from_name(name: &str) -> Option<TypeTag> {
    TABLE.by_name.get(name).map(|tag| *tag)
}

/// Human name for a tag.
pub fn type_name(tag: TypeTag) -> Option<String> {
    TABLE.entries.get(&tag).map(|entry| entry.name.clone())
}

/// Fundamental ancestor of a tag.
pub fn fundamental(tag: TypeTag) -> Option<Fundamental> {
    TABLE.entries.get(&tag).map(|entry| entry.fundamental)
}

/// Resolve a symbolic enum nick to its integer value.
pub fn enum_from_nick(tag: TypeTag, nick: &str) -> Option<i32> {
    let entry = TABLE.entries.get(&tag)?;
    entry
        .members
        .iter()
        .find(|(name, _)| name == nick)
        .map(|(_, value)| *value)
}

/// Symbolic nick for an enum value.
pub fn enum_nick(tag: TypeTag, value: i32) -> Option<String> {
    let entry = TABLE.entries.get(&tag)?;
    entry
        .members
        .iter()
        .find(|(_, v)| *v == value)
        .map(|(name, _)| name.clone())
}

/// Resolve a single flags nick to its bit value.
pub fn flags_from_nick(tag: TypeTag, nick: &str) -> Option<u32> {
    enum_from_nick(tag, nick).map(|v| v as u32)
}

/// All member nicks of an enum or flags type, in declaration order.
pub fn values_for_enum(tag: TypeTag) -> Vec<String> {
    TABLE
        .entries
        .get(&tag)
        .map(|entry| entry.members.iter().map(|(name, _)| name.clone()).collect())
        .unwrap_or_default()
}

macro_rules! well_known {
    ($($fn_name:ident => $type_name:literal),* $(,)?) => {
        $(
            #[inline]
            pub fn $fn_name() -> TypeTag {
                // bootstrap registers every well-known type
                type_from_name($type_name).unwrap_or(TypeTag::NONE)
            }
        )*
    };
}

well_known! {
    bool_type => "bool",
    int_type => "int",
    double_type => "double",
    str_type => "string",
    refstr_type => "refstr",
    image_type => "Image",
    array_int_type => "array-int",
    array_double_type => "array-double",
    array_image_type => "array-image",
    blob_type => "blob",
    band_format_type => "BandFormat",
    extend_type => "Extend",
    angle_type => "Angle",
    direction_type => "Direction",
    operation_flags_type => "OperationFlags",
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_round_trip() {
        let tag = type_from_name("BandFormat").unwrap();
        assert_eq!(type_name(tag).unwrap(), "BandFormat");
        assert_eq!(fundamental(tag), Some(Fundamental::Enum));
    }

    #[test]
    fn test_unknown_name() {
        assert_eq!(type_from_name("NoSuchType"), None);
    }

    #[test]
    fn test_enum_members() {
        let tag = band_format_type();
        assert_eq!(enum_from_nick(tag, "uchar"), Some(0));
        assert_eq!(enum_from_nick(tag, "double"), Some(7));
        assert_eq!(enum_from_nick(tag, "purple"), None);
        assert_eq!(enum_nick(tag, 6).unwrap(), "float");
    }

    #[test]
    fn test_fundamental_of_fundamental_is_itself() {
        let tag = type_from_name("enum").unwrap();
        assert_eq!(fundamental(tag), Some(Fundamental::Enum));
    }

    #[test]
    fn test_flags() {
        let flags = ArgumentFlags::REQUIRED | ArgumentFlags::INPUT;
        assert!(flags.contains(ArgumentFlags::REQUIRED));
        assert!(!flags.contains(ArgumentFlags::OUTPUT));
    }
}
