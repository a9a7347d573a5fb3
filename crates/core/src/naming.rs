//! Field-name translation between the internal (snake_case) convention and
//! the remote store's (camelCase) convention.
//!
//! Translation is table driven. Each entry pairs an internal name with its
//! remote name and translating a key swaps it with its partner; keys that
//! appear in no entry pass through unchanged. Because every name in the
//! table is distinct, the swap is a permutation of all strings and applying
//! it twice is the identity, so `to_remote(from_remote(x)) == x` holds for
//! arbitrary nested payloads, including keys that were never in the table.

use std::borrow::Cow;

use serde_json::{Map, Value};

pub type NamePair = (&'static str, &'static str);

/// Internal name, remote name.
pub const FIELD_NAMES: &[NamePair] = &[
    ("widget_type", "widgetType"),
    ("origin_depth", "originDepth"),
    ("inheritance_behavior", "inheritanceBehavior"),
    ("is_published", "isPublished"),
    ("effective_date", "effectiveDate"),
    ("expiry_date", "expiryDate"),
    ("inheritance_level", "inheritanceLevel"),
    ("can_inherit", "canInherit"),
    ("can_override", "canOverride"),
    ("template_origin", "templateOrigin"),
    ("strict_type", "strictType"),
    ("control_type", "controlType"),
    ("updated_at", "updatedAt"),
    ("version_id", "versionId"),
    ("entity_id", "entityId"),
    ("parent_id", "parentId"),
    ("widget_ids", "widgetIds"),
    ("slot_name", "slotName"),
    ("batch_kind", "batchKind"),
    ("field_errors", "fieldErrors"),
];

const fn str_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut i = 0;
    while i < a.len() {
        if a[i] != b[i] {
            return false;
        }
        i += 1;
    }
    true
}

const fn name_at(table: &[NamePair], index: usize) -> &'static str {
    let pair = table[index / 2];
    if index % 2 == 0 { pair.0 } else { pair.1 }
}

/// True when all names in the table, on both sides, are pairwise distinct.
pub const fn is_valid_table(table: &[NamePair]) -> bool {
    let total = table.len() * 2;
    let mut i = 0;
    while i < total {
        let mut j = i + 1;
        while j < total {
            if str_eq(name_at(table, i), name_at(table, j)) {
                return false;
            }
            j += 1;
        }
        i += 1;
    }
    true
}

const _: () = assert!(
    is_valid_table(FIELD_NAMES),
    "field name table must not repeat a name"
);

#[derive(Debug, Clone, Copy)]
pub struct NamingTable {
    pairs: &'static [NamePair],
}

impl Default for NamingTable {
    fn default() -> Self {
        Self { pairs: FIELD_NAMES }
    }
}

impl NamingTable {
    /// Tables other than [`FIELD_NAMES`] are checked when constructed; use a
    /// `const` assertion with [`is_valid_table`] to move the check to build time.
    pub fn new(pairs: &'static [NamePair]) -> Option<Self> {
        is_valid_table(pairs).then_some(Self { pairs })
    }

    fn swap<'a>(&self, key: &'a str) -> Cow<'a, str> {
        for &(internal, remote) in self.pairs {
            if key == internal {
                return Cow::Borrowed(remote);
            }
            if key == remote {
                return Cow::Borrowed(internal);
            }
        }
        Cow::Borrowed(key)
    }

    pub fn key_to_remote<'a>(&self, key: &'a str) -> Cow<'a, str> {
        self.swap(key)
    }

    pub fn key_from_remote<'a>(&self, key: &'a str) -> Cow<'a, str> {
        self.swap(key)
    }

    pub fn to_remote(&self, value: Value) -> Value {
        self.translate(value)
    }

    pub fn from_remote(&self, value: Value) -> Value {
        self.translate(value)
    }

    fn translate(&self, value: Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, inner) in map {
                    out.insert(self.swap(&key).into_owned(), self.translate(inner));
                }
                Value::Object(out)
            }
            Value::Array(items) => {
                Value::Array(items.into_iter().map(|v| self.translate(v)).collect())
            }
            other => other,
        }
    }
}
