//! Record-consuming capability and built-in consumers.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::record::Record;
use crate::error::BoxedError;

/// Capability of a collaborator to consume output records.
///
/// The driver calls [`write`](Self::write) once per produced record, in row
/// order, and [`finalize`](Self::finalize) exactly once after the last row.
pub trait RecordSink: Send {
    /// Consumes one record.
    fn write(&mut self, record: Record) -> Result<(), BoxedError>;

    /// Flushes and releases resources once all rows are processed.
    fn finalize(&mut self) -> Result<(), BoxedError> {
        Ok(())
    }
}

/// Record sink buffering records in shared memory.
///
/// Clones share the same buffer, so a clone kept by the caller observes
/// what the driver wrote.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<Record>>>,
    finalized: Arc<AtomicUsize>,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the records written so far.
    pub fn records(&self) -> Vec<Record> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of records written so far.
    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns whether no record has been written.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of times the sink was finalized.
    pub fn finalize_count(&self) -> usize {
        self.finalized.load(Ordering::SeqCst)
    }
}

impl RecordSink for MemorySink {
    fn write(&mut self, record: Record) -> Result<(), BoxedError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), BoxedError> {
        self.finalized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Record sink writing newline-delimited JSON.
#[derive(Debug)]
pub struct JsonLinesSink<W> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    /// Creates a sink writing to `writer`.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> RecordSink for JsonLinesSink<W> {
    fn write(&mut self, record: Record) -> Result<(), BoxedError> {
        serde_json::to_writer(&mut self.writer, &record)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), BoxedError> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_memory_sink_clones_share_buffer() {
        let sink = MemorySink::new();
        let mut writer = sink.clone();

        writer.write([("a", json!(1))].into_iter().collect()).unwrap();
        writer.finalize().unwrap();

        assert_eq!(sink.len(), 1);
        assert_eq!(sink.records()[0].get("a"), Some(&json!(1)));
        assert_eq!(sink.finalize_count(), 1);
    }

    #[test]
    fn test_json_lines_output() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.write([("id", json!(1)), ("name", json!("Luke"))].into_iter().collect())
            .unwrap();
        sink.write([("id", json!(2))].into_iter().collect()).unwrap();
        sink.finalize().unwrap();

        let output = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(output, "{\"id\":1,\"name\":\"Luke\"}\n{\"id\":2}\n");
    }
}
