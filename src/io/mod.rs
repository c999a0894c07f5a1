/*!
Persistence of per-iteration records.

The sampler never stores its trajectory itself; it hands every
[`SampleRecord`] to a [`PersistenceSink`]. Records are delivered from a single
thread, chain by chain, after each block of iterations, so a sink never sees
interleaved writes. Within a chain, records arrive in iteration order.

[`MemorySink`] keeps everything in memory and is what tests compare against.
Enable the `csv` feature for [`csv::CsvSink`].
*/

#[cfg(feature = "csv")]
pub mod csv;

use crate::chain::{Phase, SampleRecord};
use crate::error::Result;

/// Append-only destination for sample records.
///
/// An error returned from [`append`](PersistenceSink::append) aborts the run.
pub trait PersistenceSink {
    fn append(&mut self, record: &SampleRecord) -> Result<()>;

    /// Called once after every block of records has been appended.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<S: PersistenceSink + ?Sized> PersistenceSink for &mut S {
    fn append(&mut self, record: &SampleRecord) -> Result<()> {
        (**self).append(record)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl PersistenceSink for NullSink {
    fn append(&mut self, _record: &SampleRecord) -> Result<()> {
        Ok(())
    }
}

/// Keeps every record in memory, in arrival order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemorySink {
    pub records: Vec<SampleRecord>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records of one chain, in iteration order.
    pub fn chain(&self, chain: usize) -> Vec<&SampleRecord> {
        self.records.iter().filter(|r| r.chain == chain).collect()
    }

    pub fn phase(&self, phase: Phase) -> Vec<&SampleRecord> {
        self.records.iter().filter(|r| r.phase == phase).collect()
    }

    /// Values of parameter `index` over all main-run records.
    pub fn run_values(&self, index: usize) -> Vec<f64> {
        self.records
            .iter()
            .filter(|r| r.phase == Phase::Run)
            .map(|r| r.parameters[index])
            .collect()
    }
}

impl PersistenceSink for MemorySink {
    fn append(&mut self, record: &SampleRecord) -> Result<()> {
        self.records.push(record.clone());
        Ok(())
    }
}
