//! Down-sampling range query

use crate::error::{Result, ShelfError};
use crate::value::Value;

use super::ValueIndex;

/// Pull at most `limit` entries spread evenly over `[from, to]`
///
/// The range is cut into `limit` equal-width bins. Each bin contributes the
/// first entry at or after its midpoint, falling back to the first entry at
/// or after its start, as long as that entry's key lies inside the bin. Empty
/// bins contribute nothing and a repeat of the previous key is skipped, so
/// every result comes from a distinct bin.
///
/// `from` and `to` must be numeric (or time) values.
pub fn sparse_pull<I>(index: &I, from: &Value, to: &Value, limit: usize) -> Result<Vec<I::Entry>>
where
    I: ValueIndex + ?Sized,
{
    let (a, b) = match (from.as_f64(), to.as_f64()) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(ShelfError::Index(format!(
                "Sparse pull needs a numeric range, got [{}, {}]",
                from, to
            )))
        }
    };
    if limit == 0 || a > b {
        return Ok(Vec::new());
    }

    let step = (b - a) / limit as f64;
    let mut result = Vec::with_capacity(limit);
    let mut previous_key: Option<Value> = None;

    for bin in 0..limit {
        let start = a + step * bin as f64;
        let end = if bin + 1 == limit { b } else { a + step * (bin + 1) as f64 };
        let last = bin + 1 == limit;
        let in_bin = |key: &Value| match key.as_f64() {
            Some(x) => x >= start && (x < end || (last && x <= end)),
            None => false,
        };

        let midpoint = from.with_numeric(start + step / 2.0);
        let hit = match index.ceiling(&midpoint)? {
            Some((key, entry)) if in_bin(&key) => Some((key, entry)),
            _ => match index.ceiling(&from.with_numeric(start))? {
                Some((key, entry)) if in_bin(&key) => Some((key, entry)),
                _ => None,
            },
        };

        if let Some((key, entry)) = hit {
            if previous_key.as_ref() == Some(&key) {
                continue;
            }
            previous_key = Some(key);
            result.push(entry);
        }
    }
    Ok(result)
}
