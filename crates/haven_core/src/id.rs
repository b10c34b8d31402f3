//! Type-safe ID generation and management
//!
//! Provides prefixed, UUID-backed id newtypes for the handful of
//! entities the pipeline addresses by id, plus a free-form `UserId`
//! (user identifiers are minted by the upstream identity provider and
//! are opaque to us).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::str::FromStr;

/// Trait for types that can be used as ID markers
pub trait IdType: Send + Sync + 'static {
    /// Short prefix identifying the entity kind (e.g. "sess")
    const PREFIX: &'static str;

    /// The raw key portion of the id
    fn to_key(&self) -> String;
}

/// Macro to define new ID types with minimal boilerplate
#[macro_export]
macro_rules! define_id_type {
    ($type_name:ident, $prefix:expr) => {
        #[derive(
            Debug,
            PartialEq,
            Eq,
            Hash,
            Clone,
            ::serde::Serialize,
            ::serde::Deserialize,
            ::schemars::JsonSchema,
        )]
        pub struct $type_name(pub String);

        impl $crate::id::IdType for $type_name {
            const PREFIX: &'static str = $prefix;

            fn to_key(&self) -> String {
                self.0.clone()
            }
        }

        impl $type_name {
            pub fn generate() -> Self {
                $type_name(::uuid::Uuid::new_v4().simple().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $type_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(
                    f,
                    "{}:{}",
                    <$type_name as $crate::id::IdType>::PREFIX,
                    self.0,
                )
            }
        }

        impl ::std::str::FromStr for $type_name {
            type Err = ::std::convert::Infallible;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                // Accept either the bare key or the prefixed display form
                let key = match s.split_once(':') {
                    Some((prefix, rest))
                        if prefix == <$type_name as $crate::id::IdType>::PREFIX =>
                    {
                        rest
                    }
                    _ => s,
                };
                Ok($type_name(key.to_string()))
            }
        }
    };
}

define_id_type!(SessionId, "sess");
define_id_type!(ConnectionId, "conn");

/// UserId is a simple string wrapper for user identification.
/// Unlike the other id types it accepts any string, since user ids are
/// issued by the external identity collaborator.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        UserId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(UserId(s.to_string()))
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        UserId(s.to_string())
    }
}
