use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 128-bit identifier for an authenticated account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

/// 128-bit identifier for a single connected socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

macro_rules! uuid_id {
    ($ty:ident) => {
        impl $ty {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn nil() -> Self {
                Self(Uuid::nil())
            }

            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }
        }

        impl Default for $ty {
            fn default() -> Self {
                Self::nil()
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $ty {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl From<Uuid> for $ty {
            fn from(u: Uuid) -> Self {
                Self(u)
            }
        }
    };
}

uuid_id!(UserId);
uuid_id!(SessionId);

/// A match identifier: a UUID scoped to the node label that created it.
/// Serializes at protocol edges as `"<uuid>.<node>"`, the same convention
/// clients of the original server expect.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatchId {
    pub id: Uuid,
    pub node: Arc<str>,
}

impl MatchId {
    pub fn new(node: impl Into<Arc<str>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            node: node.into(),
        }
    }
}

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.id, self.node)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MatchIdParseError {
    #[error("match id missing '.node' suffix: {0:?}")]
    MissingNode(String),
    #[error(transparent)]
    Uuid(#[from] uuid::Error),
}

impl FromStr for MatchId {
    type Err = MatchIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, node) = s
            .split_once('.')
            .ok_or_else(|| MatchIdParseError::MissingNode(s.to_owned()))?;
        Ok(Self {
            id: Uuid::parse_str(id)?,
            node: Arc::from(node),
        })
    }
}

impl Serialize for MatchId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MatchId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
