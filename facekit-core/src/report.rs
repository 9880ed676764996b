use crate::Error;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// Error entry standing in for a failed item of a bulk request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemError {
    pub error: String,
}

/// Ordered bulk results, serialized as `{"<prefix>_1": .., "<prefix>_2": ..}`
#[derive(Debug)]
pub struct Batch<T> {
    prefix: &'static str,
    items: Vec<Result<T, ItemError>>,
}

impl<T> Batch<T> {
    pub fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            items: Vec::new(),
        }
    }

    /// Run `process` over every input in order. A failing item becomes an
    /// error entry in its slot; a defect aborts the whole batch.
    pub(crate) fn collect<I, F>(prefix: &'static str, inputs: I, mut process: F) -> Result<Self, Error>
    where
        I: IntoIterator,
        F: FnMut(I::Item) -> Result<T, Error>,
    {
        let mut batch = Self::new(prefix);
        for input in inputs {
            match process(input) {
                Ok(value) => batch.push(Ok(value)),
                Err(e) if e.is_defect() => return Err(e),
                Err(e) => {
                    log::warn!("{} failed: {}", batch.key(batch.len()), e);
                    batch.push(Err(ItemError { error: e.to_string() }));
                }
            }
        }
        Ok(batch)
    }

    pub fn push(&mut self, item: Result<T, ItemError>) {
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[Result<T, ItemError>] {
        &self.items
    }

    /// Key of the item at a zero-based position
    pub fn key(&self, index: usize) -> String {
        format!("{}_{}", self.prefix, index + 1)
    }

    pub fn get(&self, key: &str) -> Option<&Result<T, ItemError>> {
        let position = key
            .strip_prefix(self.prefix)?
            .strip_prefix('_')?
            .parse::<usize>()
            .ok()?;
        self.items.get(position.checked_sub(1)?)
    }
}

impl<T: Serialize> Serialize for Batch<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.items.len()))?;
        for (index, item) in self.items.iter().enumerate() {
            let key = self.key(index);
            match item {
                Ok(value) => map.serialize_entry(&key, value)?,
                Err(error) => map.serialize_entry(&key, error)?,
            }
        }
        map.end()
    }
}

/// Response shape follows the request shape: one item or a keyed batch
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Output<T> {
    Single(T),
    Bulk(Batch<T>),
}

impl<T> Output<T> {
    pub fn single(self) -> Option<T> {
        match self {
            Output::Single(value) => Some(value),
            Output::Bulk(_) => None,
        }
    }

    pub fn bulk(self) -> Option<Batch<T>> {
        match self {
            Output::Single(_) => None,
            Output::Bulk(batch) => Some(batch),
        }
    }
}

impl<T: Serialize> Output<T> {
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}
