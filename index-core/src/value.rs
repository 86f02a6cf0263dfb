//! The tagged value sum type used by the view-generator transform (§9).
//!
//! The source repository passes the transform dynamically-typed dictionary
//! objects that support `$ref`/`$values`/`$id` back-reference conventions
//! and a handful of name-lookup fallbacks. Here that's an explicit enum plus
//! a two-pass loader: the first pass walks the raw JSON and registers every
//! `$id`-tagged subtree in an arena, the second resolves `$ref` by arena
//! index. Cyclic graphs are representable because a `$ref` becomes an
//! `arena_index`, not a shared mutable reference.

use std::convert::TryFrom;

use hashbrown::HashMap;
use serde_json::Value as Json;

/// A single slot in the document arena. Values that participate in a
/// `$id`/`$ref` cycle point at each other through [`DynValue::Ref`] rather
/// than owning one another directly.
pub type ArenaIndex = usize;

#[derive(Debug, Clone, PartialEq)]
pub enum DynValue {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    String(String),
    Date(chrono::DateTime<chrono::Utc>),
    Object(HashMap<String, DynValue>),
    Array(Vec<DynValue>),
    /// A back-reference to another slot in the same [`DocumentArena`].
    Ref(ArenaIndex),
}

impl DynValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DynValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&HashMap<String, DynValue>> {
        match self {
            DynValue::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, DynValue::Null)
    }
}

/// Holds every `$id`-tagged subtree discovered while loading a document so
/// that `$ref` values elsewhere in the same document can be resolved by
/// index instead of by cloning or by shared mutable reference.
#[derive(Debug, Default)]
pub struct DocumentArena {
    slots: Vec<DynValue>,
    by_id: HashMap<String, ArenaIndex>,
}

impl DocumentArena {
    pub fn get(&self, index: ArenaIndex) -> Option<&DynValue> {
        self.slots.get(index)
    }

    pub fn resolve_id(&self, id: &str) -> Option<ArenaIndex> {
        self.by_id.get(id).copied()
    }

    /// Loads a raw JSON document into the arena, two passes:
    ///
    /// 1. scan once, registering every object carrying an `$id` field
    ///    (before resolving nested values), so forward references work;
    /// 2. convert each subtree into a [`DynValue`], replacing any `$ref`
    ///    field with [`DynValue::Ref`] pointing at its registered slot.
    pub fn load(raw: &Json) -> (Self, DynValue) {
        let mut arena = DocumentArena::default();
        arena.register_ids(raw);
        let root = arena.convert(raw);
        (arena, root)
    }

    fn register_ids(&mut self, raw: &Json) {
        if let Json::Object(map) = raw {
            if let Some(Json::String(id)) = map.get("$id") {
                // Reserve the slot now; it's filled in by `convert` on the
                // second pass once all ids are known.
                let index = self.slots.len();
                self.slots.push(DynValue::Null);
                self.by_id.insert(id.clone(), index);
            }
            for value in map.values() {
                self.register_ids(value);
            }
        } else if let Json::Array(items) = raw {
            for item in items {
                self.register_ids(item);
            }
        }
    }

    fn convert(&mut self, raw: &Json) -> DynValue {
        match raw {
            Json::Null => DynValue::Null,
            Json::Bool(b) => DynValue::Bool(*b),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    if i32::try_from(i).is_ok() {
                        DynValue::Int(i as i32)
                    } else {
                        DynValue::Long(i)
                    }
                } else {
                    DynValue::Double(n.as_f64().unwrap_or_default())
                }
            },
            Json::String(s) => DynValue::String(s.clone()),
            Json::Array(items) => {
                if let Some(Json::Array(values)) = raw.get("$values") {
                    // `$values` wrapper: flatten, the wrapper object itself
                    // is discarded.
                    return DynValue::Array(values.iter().map(|v| self.convert(v)).collect());
                }
                DynValue::Array(items.iter().map(|v| self.convert(v)).collect())
            },
            Json::Object(map) => {
                if let Some(Json::String(ref_id)) = map.get("$ref") {
                    if let Some(index) = self.by_id.get(ref_id).copied() {
                        return DynValue::Ref(index);
                    }
                }

                if let Some(Json::Array(values)) = map.get("$values") {
                    return DynValue::Array(values.iter().map(|v| self.convert(v)).collect());
                }

                let mut out = HashMap::new();
                for (key, value) in map {
                    if key == "$id" || key == "$ref" || key == "$values" {
                        continue;
                    }
                    out.insert(key.clone(), self.convert(value));
                }

                let converted = DynValue::Object(out);

                if let Some(Json::String(id)) = map.get("$id") {
                    if let Some(index) = self.by_id.get(id).copied() {
                        self.slots[index] = converted.clone();
                    }
                }

                converted
            },
        }
    }
}

/// Looks a field up on an object using the fallback chain documented in
/// §9: the raw name, then the name with a leading underscore stripped,
/// then the literal `Id` — but only once the name being looked up is
/// itself some spelling of "id"; an unrelated field name (`"name"`, say)
/// must not resolve to whatever the object's `Id` field happens to hold.
pub fn lookup_field<'a>(obj: &'a HashMap<String, DynValue>, name: &str) -> Option<&'a DynValue> {
    if let Some(value) = obj.get(name) {
        return Some(value);
    }

    let stripped = name.strip_prefix('_').unwrap_or(name);
    if stripped != name {
        if let Some(value) = obj.get(stripped) {
            return Some(value);
        }
    }

    if stripped.eq_ignore_ascii_case("id") {
        return obj.get("Id");
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_scalars() {
        let (_, value) = DocumentArena::load(&serde_json::json!({
            "name": "ayende",
            "age": 41,
            "score": 9.5,
            "active": true,
            "missing": null,
        }));

        let obj = value.as_object().unwrap();
        assert_eq!(obj.get("name").unwrap().as_str(), Some("ayende"));
        assert_eq!(obj.get("age").unwrap(), &DynValue::Int(41));
        assert_eq!(obj.get("score").unwrap(), &DynValue::Double(9.5));
        assert_eq!(obj.get("active").unwrap(), &DynValue::Bool(true));
        assert!(obj.get("missing").unwrap().is_null());
    }

    #[test]
    fn resolves_forward_and_backward_refs() {
        let raw = serde_json::json!({
            "$id": "1",
            "name": "root",
            "child": { "$id": "2", "name": "child", "parent": { "$ref": "1" } },
            "sibling_ref": { "$ref": "2" },
        });

        let (arena, root) = DocumentArena::load(&raw);
        let root_obj = root.as_object().unwrap();

        let child = root_obj.get("child").unwrap().as_object().unwrap();
        let parent_ref = child.get("parent").unwrap();
        match parent_ref {
            DynValue::Ref(index) => {
                let resolved = arena.get(*index).unwrap();
                assert_eq!(resolved.as_object().unwrap().get("name").unwrap().as_str(), Some("root"));
            },
            other => panic!("expected a Ref, got {:?}", other),
        }

        match root_obj.get("sibling_ref").unwrap() {
            DynValue::Ref(index) => {
                let resolved = arena.get(*index).unwrap();
                assert_eq!(resolved.as_object().unwrap().get("name").unwrap().as_str(), Some("child"));
            },
            other => panic!("expected a Ref, got {:?}", other),
        }
    }

    #[test]
    fn field_lookup_fallback_chain() {
        let mut obj = HashMap::new();
        obj.insert("Id".to_string(), DynValue::String("doc/1".to_string()));
        assert_eq!(lookup_field(&obj, "name"), None);
        assert_eq!(lookup_field(&obj, "_id").unwrap().as_str(), Some("doc/1"));

        let mut obj2 = HashMap::new();
        obj2.insert("id".to_string(), DynValue::String("doc/2".to_string()));
        assert_eq!(lookup_field(&obj2, "_id").unwrap().as_str(), Some("doc/2"));
    }
}
