//! Ordinal index: the key of an entry is its position

use crate::error::Result;
use crate::value::Value;

use super::ValueIndex;

/// Index over a sequence where entry `i` has key `i`
#[derive(Debug, Clone)]
pub struct OrdinalIndex<E> {
    entries: Vec<E>,
}

impl<E: Clone> OrdinalIndex<E> {
    pub fn new(entries: Vec<E>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Positions covered by `[from, to]`, clamped to the sequence
    fn positions(&self, from: f64, to: f64) -> std::ops::Range<usize> {
        if self.entries.is_empty() || to < 0.0 || from > to {
            return 0..0;
        }
        let start = from.max(0.0).ceil() as usize;
        let end = (to.floor() as usize).saturating_add(1).min(self.entries.len());
        start.min(end)..end
    }
}

impl<E: Clone> ValueIndex for OrdinalIndex<E> {
    type Entry = E;

    fn pull(&self, key: &Value) -> Result<Vec<E>> {
        Ok(match key.as_f64() {
            Some(x) if x >= 0.0 && x.fract() == 0.0 => {
                self.entries.get(x as usize).cloned().into_iter().collect()
            }
            _ => Vec::new(),
        })
    }

    fn pull_range(&self, from: &Value, to: &Value) -> Result<Vec<E>> {
        Ok(match (from.as_f64(), to.as_f64()) {
            (Some(a), Some(b)) => self.entries[self.positions(a, b)].to_vec(),
            _ => Vec::new(),
        })
    }

    fn ceiling(&self, key: &Value) -> Result<Option<(Value, E)>> {
        Ok(key.as_f64().and_then(|x| {
            let i = x.max(0.0).ceil() as usize;
            self.entries.get(i).map(|e| (Value::from(i), e.clone()))
        }))
    }

    fn key_set(&self) -> Result<Vec<Value>> {
        Ok((0..self.entries.len()).map(Value::from).collect())
    }
}
