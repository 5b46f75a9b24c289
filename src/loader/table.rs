//! Table loader
//!
//! Rows of a fixed table format, appended one line per row to the data
//! block. Column indices are incremental [`FileIndex`]es cached per column.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::dispatch::{Listeners, Subscription};
use crate::envelope::{FileEnvelope, Line};
use crate::error::{Result, ShelfError};
use crate::index::{FileIndex, OrdinalIndex};
use crate::table::{Row, TableFormat};
use crate::value::Value;

use super::LoaderBase;

/// Bytes read per batch while iterating rows
const READ_BATCH: u64 = 64 * 1024;

/// Event delivered to row listeners after a successful push
#[derive(Debug, Clone)]
pub struct RowPushed {
    pub loader: String,
    pub row: Row,
}

/// Append-only table of rows
pub struct TableLoader {
    base: LoaderBase,
    format: TableFormat,
    indices: Mutex<HashMap<String, Arc<FileIndex<Row>>>>,
    listeners: Listeners<RowPushed>,
}

impl TableLoader {
    pub(super) fn new(base: LoaderBase) -> Result<Self> {
        let format = TableFormat::from_meta(base.config())?;
        Ok(Self {
            base,
            format,
            indices: Mutex::new(HashMap::new()),
            listeners: Listeners::new(),
        })
    }

    pub fn base(&self) -> &LoaderBase {
        &self.base
    }

    pub fn format(&self) -> &TableFormat {
        &self.format
    }

    /// Append one row and notify row listeners in the background
    pub fn push(&self, row: Row) -> Result<()> {
        let line = self.format.encode(&row)?;
        self.base.envelope().append(line.as_bytes())?;
        self.listeners.notify(
            self.base.context().dispatcher(),
            RowPushed {
                loader: self.base.name().to_string(),
                row,
            },
        );
        Ok(())
    }

    /// Append several rows with a single data write
    pub fn push_all(&self, rows: Vec<Row>) -> Result<()> {
        let mut block = String::new();
        for row in &rows {
            block.push_str(&self.format.encode(row)?);
        }
        if block.is_empty() {
            return Ok(());
        }
        self.base.envelope().append(block.as_bytes())?;
        for row in rows {
            self.listeners.notify(
                self.base.context().dispatcher(),
                RowPushed {
                    loader: self.base.name().to_string(),
                    row,
                },
            );
        }
        Ok(())
    }

    /// Replay every row from the start of the data block
    pub fn rows(&self) -> RowIter {
        RowIter {
            envelope: Arc::clone(self.base.envelope()),
            format: self.format.clone(),
            offset: 0,
            pending: VecDeque::new(),
            finished: false,
        }
    }

    /// Number of rows (scans the data block)
    pub fn len(&self) -> Result<usize> {
        self.rows().try_fold(0, |n, row| row.map(|_| n + 1))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.base.envelope().data_length()? == 0)
    }

    /// Incremental index keyed by a column, cached per column
    pub fn get_index(&self, column: &str) -> Result<Arc<FileIndex<Row>>> {
        let position = self.format.position(column).ok_or_else(|| {
            ShelfError::Schema(format!(
                "Table '{}' has no column '{}'",
                self.base.name(),
                column
            ))
        })?;

        let mut indices = self.indices.lock();
        if let Some(index) = indices.get(column) {
            return Ok(Arc::clone(index));
        }

        let format = self.format.clone();
        let cache_path = self
            .base
            .cache_dir()
            .join(format!("{}.{}.idx", self.base.name(), column));
        let index = Arc::new(FileIndex::new(
            Arc::clone(self.base.envelope()),
            cache_path,
            self.base.context().config().index_persist_threshold,
            move |line| format.decode(line),
            move |row: &Row| row.get(position).cloned().unwrap_or(Value::Null),
        ));
        indices.insert(column.to_string(), Arc::clone(&index));
        Ok(index)
    }

    /// Index of rows by position
    pub fn ordinal_index(&self) -> Result<OrdinalIndex<Row>> {
        Ok(OrdinalIndex::new(self.rows().collect::<Result<Vec<_>>>()?))
    }

    /// Drop every row
    ///
    /// This breaks the append-only assumption of the column indices, so all
    /// of them are invalidated and every snapshot on disk is deleted, not
    /// only those of columns indexed by this process.
    pub fn clear(&self) -> Result<()> {
        self.base.envelope().clear_data()?;
        for index in self.indices.lock().values() {
            index.invalidate()?;
        }
        self.base.delete_snapshots();
        Ok(())
    }

    /// Register a listener for pushed rows
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&RowPushed) -> Result<()> + Send + Sync + 'static,
    {
        self.listeners.subscribe(listener)
    }
}

/// Streaming iterator over the rows of a table loader
pub struct RowIter {
    envelope: Arc<FileEnvelope>,
    format: TableFormat,
    offset: u64,
    pending: VecDeque<Line>,
    finished: bool,
}

impl Iterator for RowIter {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(line) = self.pending.pop_front() {
                if !crate::index::is_content_line(&line.text) {
                    continue;
                }
                return Some(self.format.decode(&line.text));
            }
            if self.finished {
                return None;
            }
            match self.envelope.read_lines(self.offset, READ_BATCH) {
                Ok((lines, next)) => {
                    if lines.is_empty() {
                        self.finished = true;
                    }
                    self.offset = next;
                    self.pending.extend(lines);
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
