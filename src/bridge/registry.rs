//! Host-side type registry.
//!
//! Thin memo over the runtime type table: name→tag and tag→name lookups
//! are cached here so repeated resolution never crosses back into the
//! runtime. Populated lazily, lives for the process.

use crate::engine::types::{self, Fundamental, TypeTag};
use crate::errors::{Error, Result};
use dashmap::DashMap;
use once_cell::sync::Lazy;

static NAME_TO_TAG: Lazy<DashMap<String, TypeTag>> = Lazy::new(DashMap::new);
static TAG_TO_NAME: Lazy<DashMap<TypeTag, String>> = Lazy::new(DashMap::new);

/// Tag for a type name.
pub fn type_find(name: &str) -> Result<TypeTag> {
    if let Some(hit) = NAME_TO_TAG.get(name) {
        return Ok(*hit);
    }
    let tag = types::type_from_name(name).ok_or_else(|| Error::unsupported_type(name))?;
    NAME_TO_TAG.insert(name.to_string(), tag);
    Ok(tag)
}

/// Human name for a tag.
pub fn type_name(tag: TypeTag) -> Result<String> {
    if let Some(hit) = TAG_TO_NAME.get(&tag) {
        return Ok(hit.clone());
    }
    let name = types::type_name(tag).ok_or_else(|| Error::unsupported_type(format!("tag#{}", tag.0)))?;
    TAG_TO_NAME.insert(tag, name.clone());
    Ok(name)
}

/// Fundamental ancestor of a tag.
pub fn fundamental_of(tag: TypeTag) -> Result<Fundamental> {
    types::fundamental(tag).ok_or_else(|| Error::unsupported_type(format!("tag#{}", tag.0)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memoized_lookup() {
        let first = type_find("Image").unwrap();
        let second = type_find("Image").unwrap();
        assert_eq!(first, second);
        assert_eq!(type_name(first).unwrap(), "Image");
        assert_eq!(fundamental_of(first).unwrap(), Fundamental::Object);
    }

    #[test]
    fn test_unknown_type() {
        assert!(type_find("Banana").is_err());
    }
}
