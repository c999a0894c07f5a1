/*!
# CSV record sink

Writes sample records as CSV rows. Enable via the `csv` feature.

The file has a header row with the columns `chain`, `iteration`,
`log_probability`, `phase`, followed by one column per parameter name. Every
subsequent row is one record.
*/

use std::fs::File;
use std::io::Write;
use std::path::Path;

use csv::Writer;

use crate::chain::SampleRecord;
use crate::error::{Error, Result};
use crate::io::PersistenceSink;

pub struct CsvSink<W: Write> {
    writer: Writer<W>,
    n_params: usize,
}

impl CsvSink<File> {
    /**
    Creates (or truncates) `path` and writes the header.

    # Examples

    ```rust
    use bayes_mcmc::io::csv::CsvSink;

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("chains.csv");
    let sink = CsvSink::create(&path, &["mu".to_string(), "sigma".to_string()])?;
    assert!(path.exists());
    # Ok::<(), bayes_mcmc::error::Error>(())
    ```
    */
    pub fn create<P: AsRef<Path>>(path: P, parameter_names: &[String]) -> Result<Self> {
        Self::from_writer(File::create(path)?, parameter_names)
    }
}

impl<W: Write> CsvSink<W> {
    pub fn from_writer(writer: W, parameter_names: &[String]) -> Result<Self> {
        let mut writer = Writer::from_writer(writer);
        let mut header: Vec<String> = ["chain", "iteration", "log_probability", "phase"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        header.extend(parameter_names.iter().cloned());
        writer.write_record(&header)?;
        Ok(Self {
            writer,
            n_params: parameter_names.len(),
        })
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| Error::Persistence(e.to_string()))
    }
}

impl<W: Write> PersistenceSink for CsvSink<W> {
    fn append(&mut self, record: &SampleRecord) -> Result<()> {
        if record.parameters.len() != self.n_params {
            return Err(Error::Persistence(format!(
                "record has {} parameters, header has {}",
                record.parameters.len(),
                self.n_params
            )));
        }
        let mut row = vec![
            record.chain.to_string(),
            record.iteration.to_string(),
            record.log_probability.to_string(),
            record.phase.to_string(),
        ];
        row.extend(record.parameters.iter().map(|v| v.to_string()));
        self.writer.write_record(&row)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
