// SPDX-License-Identifier: Apache-2.0

//! A wrapper for values that must never reach a log line or error message
//! in the clear — most importantly connection-URI passwords, which flow
//! through [`crate::registry`] callers' connection targets on their way
//! from a URI string into a driver's connection options and must not end
//! up in a `tracing` span or a `Debug`-derived error.

use std::fmt::{self, Debug, Display, Formatter};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Clone, Eq, PartialEq, Hash)]
pub struct Sensitive<T>(T);

impl<T> Sensitive<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Exposes the inner value. Call this only where the value is actually
    /// needed (building a connection string, binding a query argument) —
    /// never to satisfy a log statement.
    pub fn expose(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Debug for Sensitive<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T> Display for Sensitive<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Serialize> Serialize for Sensitive<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str("***")
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Sensitive<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        T::deserialize(deserializer).map(Sensitive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_and_display_redact() {
        let secret = Sensitive::new("hunter2");
        assert_eq!(format!("{:?}", secret), "[REDACTED]");
        assert_eq!(format!("{}", secret), "[REDACTED]");
    }

    #[test]
    fn serialize_redacts_but_deserialize_passes_through() {
        let secret = Sensitive::new("hunter2".to_string());
        assert_eq!(serde_json::to_string(&secret).unwrap(), "\"***\"");

        let restored: Sensitive<String> = serde_json::from_str("\"hunter2\"").unwrap();
        assert_eq!(restored.expose(), "hunter2");
    }
}
