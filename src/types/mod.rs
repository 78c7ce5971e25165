mod order;

use std::fmt;

pub use order::OrderType;

/// Literal rendered into a key for a descriptor field that was not provided.
pub const UNDEFINED_FIELD: &str = "undefined";

/// Separator between the fields of a [`PendingKey`].
pub const KEY_SEPARATOR: &str = ":";

/// Separator between the pool addresses of a swap path.
pub const SWAP_PATH_SEPARATOR: &str = "-";

/// Deterministic identity of an in-flight protocol operation.
///
/// Two descriptors with identical semantic fields always produce
/// identical keys, which lets an optimistic client-side record be
/// found again once the matching on-chain event is observed.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PendingKey(String);

impl PendingKey {
    pub(crate) fn new(key: String) -> Self {
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for PendingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PendingKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
