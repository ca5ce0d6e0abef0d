use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::record::FieldMap;
use crate::schema::Schema;
use crate::value::normalize;

/// Bumped whenever normalization changes, so old snapshots stop matching.
const FINGERPRINT_VERSION: &[u8] = b"lmenrich-fingerprint-v1";

/// Deterministic cache key for (schema id, normalized input values).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hash the schema id and the declared input columns only; extra record
    /// columns never affect the key.
    pub fn compute(schema: &Schema, inputs: &FieldMap) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(FINGERPRINT_VERSION);
        hasher.update(b"\0schema:");
        hasher.update(schema.id.as_bytes());
        let mut columns: Vec<_> = schema.input_columns.iter().collect();
        columns.sort_by(|a, b| a.name.cmp(&b.name));
        for column in columns {
            hasher.update(b"\0column:");
            hasher.update(column.name.as_bytes());
            hasher.update(b"\0");
            hasher.update(column.kind.to_string().as_bytes());
            hasher.update(b"\0value:");
            hasher.update(normalize(inputs.get(&column.name), column.kind).as_bytes());
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
