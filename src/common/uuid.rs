use serde::{Deserialize, Serialize};

macro_rules! impl_uuid {
    ($struct_name:ident) => {
        impl $struct_name {
            pub fn now_v7() -> Self {
                Self { inner: uuid::Uuid::now_v7() }
            }

            pub fn is_nil(&self) -> bool {
                self.inner.is_nil()
            }
        }

        impl From<uuid::Uuid> for $struct_name {
            fn from(value: uuid::Uuid) -> Self {
                Self { inner: value }
            }
        }

        impl std::fmt::Display for $struct_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.inner)
            }
        }
    };
}

#[derive(Clone, Copy, Debug, Hash, PartialOrd, Ord, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityUuid {
    inner: uuid::Uuid,
}

impl_uuid!(EntityUuid);

#[derive(Clone, Copy, Debug, Hash, PartialOrd, Ord, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationUuid {
    inner: uuid::Uuid,
}

impl_uuid!(RelationUuid);

/// Whatever a history entry was recorded against.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, derive_more::From)]
pub enum ElementUuid {
    Entity(EntityUuid),
    Relation(RelationUuid),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_uuids_are_distinct() {
        let a = EntityUuid::now_v7();
        let b = EntityUuid::now_v7();
        assert_ne!(a, b);
        assert!(!a.is_nil());
    }

    #[test]
    fn tagged_uuid_keeps_kind() {
        let e = EntityUuid::now_v7();
        let r = RelationUuid::now_v7();
        assert_eq!(ElementUuid::from(e), ElementUuid::Entity(e));
        assert_eq!(ElementUuid::from(r), ElementUuid::Relation(r));
        assert_ne!(ElementUuid::from(e), ElementUuid::from(RelationUuid::from(uuid::Uuid::nil())));
    }
}
