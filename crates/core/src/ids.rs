use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CoreError;

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), &self.0.to_string()[..8])
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| CoreError::InvalidData(format!("{}: {e}", stringify!($name))))
            }
        }
    };
}

uuid_id!(PageId);
uuid_id!(ObjectId);
uuid_id!(OpId);
uuid_id!(SubscriptionId);

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

// Widget ids are chosen by the backend or the editor, so they are opaque
// strings rather than uuids. Generated ids use the uuid v7 text form.
string_id!(WidgetId);
string_id!(ComponentId);

impl WidgetId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

/// The entity that owns a set of slots: a page in the tree or a flat
/// object record.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "domain", content = "id", rename_all = "snake_case")]
pub enum EntityRef {
    Page(PageId),
    Object(ObjectId),
}

impl EntityRef {
    pub fn as_page(&self) -> Option<PageId> {
        match self {
            Self::Page(id) => Some(*id),
            Self::Object(_) => None,
        }
    }

    pub fn id_string(&self) -> String {
        match self {
            Self::Page(id) => id.to_string(),
            Self::Object(id) => id.to_string(),
        }
    }
}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Page(id) => write!(f, "{id:?}"),
            Self::Object(id) => write!(f, "{id:?}"),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Page(id) => write!(f, "page:{id}"),
            Self::Object(id) => write!(f, "object:{id}"),
        }
    }
}

/// A slot on a specific entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotRef {
    pub entity: EntityRef,
    pub slot: String,
}

impl SlotRef {
    pub fn new(entity: EntityRef, slot: impl Into<String>) -> Self {
        Self {
            entity,
            slot: slot.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_ids_parse_their_display_form() {
        let id = PageId::new();
        let parsed: PageId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn invalid_uuid_is_rejected() {
        let result = "not-a-uuid".parse::<ObjectId>();
        assert!(matches!(result, Err(CoreError::InvalidData(_))));
    }

    #[test]
    fn generated_widget_ids_are_distinct() {
        let a = WidgetId::generate();
        let b = WidgetId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn entity_ref_serializes_with_domain_tag() {
        let id = ObjectId::new();
        let value = serde_json::to_value(EntityRef::Object(id)).unwrap();
        assert_eq!(value["domain"], "object");
        assert_eq!(value["id"], id.to_string());
    }
}
