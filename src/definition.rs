//! The data-definition/dataset registry: maps application record
//! layouts onto the host's numbered field-name protocol and performs
//! typed, layout-aware extraction of returned packets.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::host::{ConnectionHandle, FieldSpec, HostBinding};

/// A scalar type tag as understood by `AddToDataDefinition`'s `datum_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    Int32,
    Int64,
    Float32,
    Float64,
    String8,
    String32,
    String64,
    String128,
    String256,
    String260,
}

impl ScalarType {
    /// Native `SIMCONNECT_DATATYPE_*` tag this scalar type marshals to.
    pub fn datum_type(self) -> i32 {
        match self {
            ScalarType::Int32 => 2,
            ScalarType::Int64 => 3,
            ScalarType::Float32 => 4,
            ScalarType::Float64 => 5,
            ScalarType::String8 => 6,
            ScalarType::String32 => 7,
            ScalarType::String64 => 8,
            ScalarType::String128 => 9,
            ScalarType::String256 => 10,
            ScalarType::String260 => 11,
        }
    }

    pub fn byte_width(self) -> usize {
        match self {
            ScalarType::Int32 | ScalarType::Float32 => 4,
            ScalarType::Int64 | ScalarType::Float64 => 8,
            ScalarType::String8 => 8,
            ScalarType::String32 => 32,
            ScalarType::String64 => 64,
            ScalarType::String128 => 128,
            ScalarType::String256 => 256,
            ScalarType::String260 => 260,
        }
    }
}

/// One field of a [`Dataset`]: name, unit, scalar type, change-detection
/// epsilon. `ordinal` is assigned at registration time from field order.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub unit: String,
    pub scalar_type: ScalarType,
    pub epsilon: f32,
}

impl Field {
    pub fn new(name: impl Into<String>, unit: impl Into<String>, scalar_type: ScalarType) -> Self {
        Self {
            name: name.into(),
            unit: unit.into(),
            scalar_type,
            epsilon: 0.0,
        }
    }

    pub fn with_epsilon(mut self, epsilon: f32) -> Self {
        self.epsilon = epsilon;
        self
    }
}

/// An ordered list of fields describing an application record layout.
/// Field order must match the memory order of the record the caller will
/// later cast packets into.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset(Vec<Field>);

impl Dataset {
    pub fn new(fields: Vec<Field>) -> Self {
        Self(fields)
    }

    pub fn fields(&self) -> &[Field] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Deep copy yielding an independent list.
    pub fn clone_dataset(&self) -> Dataset {
        self.clone()
    }

    /// Concatenates datasets with last-wins deduplication by field name,
    /// preserving the position of the last occurrence. `merge()` is empty;
    /// `merge(x)` is `x.clone_dataset()`.
    pub fn merge(datasets: &[&Dataset]) -> Dataset {
        // Walk back-to-front so the *last* dataset's fields win, then keep
        // only the first (i.e. rightmost-original) sighting of each name,
        // then reverse to restore "later occurrence keeps its position".
        let mut seen = std::collections::HashSet::new();
        let mut merged = Vec::new();
        for dataset in datasets.iter().rev() {
            for field in dataset.0.iter().rev() {
                if seen.insert(field.name.clone()) {
                    merged.push(field.clone());
                }
            }
        }
        merged.reverse();
        Dataset(merged)
    }

    fn byte_size(&self) -> usize {
        self.0.iter().map(|f| f.scalar_type.byte_width()).sum()
    }
}

/// Fluent builder for a [`Dataset`]; each [`build`](Self::build) produces an
/// independent snapshot so the builder can keep being extended afterwards.
#[derive(Debug, Clone, Default)]
pub struct DatasetBuilder {
    fields: Vec<Field>,
}

impl DatasetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn remove_field(mut self, name: &str) -> Self {
        self.fields.retain(|f| f.name != name);
        self
    }

    pub fn reset(mut self) -> Self {
        self.fields.clear();
        self
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn build(&self) -> Dataset {
        Dataset(self.fields.clone())
    }
}

/// Thread-safe registry of numbered data definitions, keyed by the 32-bit
/// define-id used in every `request_data_on_sim_object` call.
#[derive(Default)]
pub struct DefinitionRegistry {
    datasets: RwLock<HashMap<u32, Dataset>>,
}

impl DefinitionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Walks the dataset's fields in order, registering each with the host.
    /// On any field failure the partial registration is left in place on
    /// the host (definitions are not transactional there); the caller must
    /// `clear` and retry.
    pub fn register(
        &self,
        binding: &dyn HostBinding,
        handle: ConnectionHandle,
        define_id: u32,
        dataset: Dataset,
    ) -> Result<()> {
        for (ordinal, field) in dataset.fields().iter().enumerate() {
            let spec = FieldSpec {
                name: &field.name,
                unit: &field.unit,
                datum_type: field.scalar_type.datum_type(),
                epsilon: field.epsilon,
                ordinal: ordinal as u32,
            };
            binding.add_to_data_definition(handle, define_id, &spec)?;
        }
        self.datasets.write().insert(define_id, dataset);
        Ok(())
    }

    pub fn clear(&self, binding: &dyn HostBinding, handle: ConnectionHandle, define_id: u32) -> Result<()> {
        binding.clear_data_definition(handle, define_id)?;
        self.datasets.write().remove(&define_id);
        Ok(())
    }

    pub fn get(&self, define_id: u32) -> Option<Dataset> {
        self.datasets.read().get(&define_id).cloned()
    }

    /// Re-declares every registered dataset against a fresh connection
    /// handle. Called by the connection manager on entry to `available`
    /// after a reconnect.
    pub fn redeclare_all(&self, binding: &dyn HostBinding, handle: ConnectionHandle) -> Result<()> {
        let snapshot: Vec<(u32, Dataset)> = self.datasets.read().iter().map(|(k, v)| (*k, v.clone())).collect();
        for (define_id, dataset) in snapshot {
            self.register(binding, handle, define_id, dataset)?;
        }
        Ok(())
    }

    /// Zero-copy cast of a packet's payload into `T`, given that `dataset`'s
    /// byte width matches `T`'s size exactly (the caller's record layout is
    /// assumed to mirror the definition field-for-field).
    pub fn decode<T: Copy>(&self, define_id: u32, payload: &[u8]) -> Result<T> {
        let dataset = self.get(define_id).ok_or(Error::NotConnected)?;
        let expected = dataset.byte_size().max(std::mem::size_of::<T>());
        if payload.len() < expected {
            return Err(Error::HostError {
                procedure: "decode",
                code: payload.len() as i32,
            });
        }
        // SAFETY: caller guarantees `T`'s in-memory layout matches the
        // registered field order/widths; we only require the payload be at
        // least as long as `T` and read unaligned to tolerate any packing.
        Ok(unsafe { std::ptr::read_unaligned(payload.as_ptr() as *const T) })
    }
}

/// Truncates a fixed-width, null-padded byte array at the first null byte
/// and decodes it as UTF-8 (lossily, since the host's narrow encoding is not
/// guaranteed to be valid UTF-8 for every locale).
pub fn read_fixed_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str) -> Field {
        Field::new(name, "", ScalarType::Int32)
    }

    fn dataset(names: &[&str]) -> Dataset {
        Dataset::new(names.iter().map(|n| field(n)).collect())
    }

    #[test]
    fn merge_is_last_wins_preserving_position() {
        let a = dataset(&["A", "B", "C"]);
        let b = dataset(&["B", "D"]);
        let merged = Dataset::merge(&[&a, &b]);
        let names: Vec<_> = merged.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["A", "C", "B", "D"]);
    }

    #[test]
    fn merge_zero_args_is_empty() {
        assert!(Dataset::merge(&[]).is_empty());
    }

    #[test]
    fn merge_one_arg_is_clone() {
        let a = dataset(&["A", "B"]);
        assert_eq!(Dataset::merge(&[&a]), a.clone_dataset());
    }

    #[test]
    fn merge_is_associative_under_last_wins() {
        let a = dataset(&["A", "B"]);
        let b = dataset(&["B", "C"]);
        let c = dataset(&["C", "D"]);

        let bc = Dataset::merge(&[&b, &c]);
        let left = Dataset::merge(&[&a, &bc]);

        let ab = Dataset::merge(&[&a, &b]);
        let right = Dataset::merge(&[&ab, &c]);

        assert_eq!(left, right);
    }

    #[test]
    fn builder_build_is_an_independent_snapshot() {
        let builder = DatasetBuilder::new().add_field(field("A"));
        let first = builder.build();
        let builder = builder.add_field(field("B"));
        let second = builder.build();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 2);
    }

    #[test]
    fn read_fixed_string_truncates_at_null() {
        let mut bytes = [0u8; 8];
        bytes[..4].copy_from_slice(b"ABCD");
        assert_eq!(read_fixed_string(&bytes), "ABCD");
    }
}
