use anyhow::Result;
use l2rl_core::{env::InfoRecord, error::L2rlError};
use std::{
    fs::{self, File},
    path::{Path, PathBuf},
};
use tracing::debug;

/// Streams per step info records to a csv file. The columns are the fixed leading columns
/// followed by the keys of the first info record written; keys a later record lacks are left
/// empty and keys the first record did not have are dropped.
pub struct EpisodeLogWriter {
    writer: csv::Writer<File>,
    path: PathBuf,
    leading_columns: Vec<String>,
    info_columns: Option<Vec<String>>,
    flush_interval: usize,
    rows_since_flush: usize,
    rows: usize,
}

impl EpisodeLogWriter {
    pub const DEFAULT_FLUSH_INTERVAL: usize = 1000;

    pub fn create(path: impl AsRef<Path>, leading_columns: &[&str]) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let writer = csv::Writer::from_path(&path)?;
        Ok(Self {
            writer,
            path,
            leading_columns: leading_columns.iter().map(|c| c.to_string()).collect(),
            info_columns: None,
            flush_interval: Self::DEFAULT_FLUSH_INTERVAL,
            rows_since_flush: 0,
            rows: 0,
        })
    }

    /// Flush after at least this many rows were written. Zero flushes after every write.
    pub fn with_flush_interval(mut self, flush_interval: usize) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn write(&mut self, leading_values: &[String], infos: &[InfoRecord]) -> Result<()> {
        if leading_values.len() != self.leading_columns.len() {
            return Err(L2rlError::shape_mismatch(
                "leading columns",
                self.leading_columns.len(),
                leading_values.len(),
            )
            .into());
        }
        for info in infos {
            if self.info_columns.is_none() {
                let columns: Vec<String> = info.keys().cloned().collect();
                self.writer
                    .write_record(self.leading_columns.iter().chain(&columns))?;
                self.info_columns = Some(columns);
            }
            let Some(columns) = &self.info_columns else {
                continue;
            };
            let values = columns
                .iter()
                .map(|column| info.get(column).map(ToString::to_string).unwrap_or_default());
            self.writer
                .write_record(leading_values.iter().cloned().chain(values))?;
            self.rows += 1;
            self.rows_since_flush += 1;
        }
        if self.rows_since_flush > 0 && self.rows_since_flush >= self.flush_interval {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        debug!(path = %self.path.display(), rows = self.rows, "episode log flushed");
        self.rows_since_flush = 0;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use l2rl_core::env::InfoValue;

    fn record(pairs: &[(&str, InfoValue)]) -> InfoRecord {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn header_comes_from_the_first_record() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("logs").join("episodes.csv");
        let mut log = EpisodeLogWriter::create(&path, &["task"])?.with_flush_interval(1);
        log.write(
            &["1".to_string()],
            &[record(&[("reward", 1.5f64.into()), ("action", 1u32.into())])],
        )?;
        log.write(
            &["2".to_string()],
            &[
                record(&[("reward", 0f64.into())]),
                record(&[("action", 0u32.into()), ("extra", true.into())]),
            ],
        )?;
        assert_eq!(log.rows(), 3);

        let mut reader = csv::Reader::from_path(&path)?;
        let headers: Vec<String> = reader.headers()?.iter().map(String::from).collect();
        assert_eq!(headers, vec!["task", "action", "reward"]);
        let rows = reader
            .records()
            .map(|r| r.map(|r| r.iter().map(String::from).collect::<Vec<_>>()))
            .collect::<Result<Vec<_>, _>>()?;
        assert_eq!(
            rows,
            vec![
                vec!["1", "1", "1.5"],
                vec!["2", "", "0"],
                vec!["2", "0", ""],
            ]
        );
        Ok(())
    }

    #[test]
    fn leading_values_must_match_columns() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut log = EpisodeLogWriter::create(dir.path().join("e.csv"), &["task"])?;
        assert!(log.write(&[], &[InfoRecord::new()]).is_err());
        Ok(())
    }
}
