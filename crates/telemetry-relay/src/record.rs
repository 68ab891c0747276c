// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// One observation reported by the rover: a set of named fields.
///
/// The relay never interprets the fields. Arrival order is carried by the
/// position of the record in the buffer, not by the record itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TelemetryRecord {
    fields: Map<String, Value>,
}

impl TelemetryRecord {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }
}

impl From<Map<String, Value>> for TelemetryRecord {
    fn from(fields: Map<String, Value>) -> Self {
        Self::new(fields)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for TelemetryRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::new(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl fmt::Display for TelemetryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Map<String, Value> always serializes; fall back to Debug just in case
        match serde_json::to_string(&self.fields) {
            Ok(s) => f.write_str(&s),
            Err(_) => write!(f, "{:?}", self.fields),
        }
    }
}
