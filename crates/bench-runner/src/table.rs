use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const REPORT_HEADER: [&str; 5] = ["test", "answer", "t_backend", "t_solver", "paths"];

#[derive(Debug, Error)]
pub enum TableError {
    #[error("expected row length of '{expected}' but got '{actual}'")]
    RowLength { expected: usize, actual: usize },

    #[error("report file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("report file {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableMode {
    Buffered,
    Direct,
}

/// Not synchronized; concurrent writers must serialize `add_row` themselves.
#[derive(Debug)]
pub struct ResultTable {
    path: PathBuf,
    header: Vec<String>,
    mode: TableMode,
    buffer: Vec<Vec<String>>,
}

impl ResultTable {
    pub fn create<S: AsRef<str>>(
        path: &Path,
        header: &[S],
        mode: TableMode,
    ) -> Result<Self, TableError> {
        let header: Vec<String> = header.iter().map(|h| h.as_ref().to_string()).collect();
        let mut writer = csv::Writer::from_path(path).map_err(|source| TableError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        writer
            .write_record(&header)
            .map_err(|source| TableError::Csv {
                path: path.to_path_buf(),
                source,
            })?;
        writer.flush().map_err(|source| TableError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            header,
            mode,
            buffer: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn mode(&self) -> TableMode {
        self.mode
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn add_row(&mut self, row: Vec<String>) -> Result<(), TableError> {
        if row.len() != self.header.len() {
            return Err(TableError::RowLength {
                expected: self.header.len(),
                actual: row.len(),
            });
        }
        match self.mode {
            TableMode::Buffered => {
                self.buffer.push(row);
                Ok(())
            }
            TableMode::Direct => self.append(std::slice::from_ref(&row)),
        }
    }

    pub fn commit(&mut self) -> Result<(), TableError> {
        if self.mode == TableMode::Direct || self.buffer.is_empty() {
            return Ok(());
        }
        self.append(&self.buffer)?;
        self.buffer.clear();
        Ok(())
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    fn append(&self, rows: &[Vec<String>]) -> Result<(), TableError> {
        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|source| TableError::Io {
                path: self.path.clone(),
                source,
            })?;
        let mut writer = csv::Writer::from_writer(file);
        for row in rows {
            writer.write_record(row).map_err(|source| TableError::Csv {
                path: self.path.clone(),
                source,
            })?;
        }
        writer.flush().map_err(|source| TableError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    pub test: PathBuf,
    pub answer: String,
    pub t_backend: f64,
    pub t_solver: f64,
    pub paths: u64,
}

impl ReportRow {
    pub fn into_record(self) -> Vec<String> {
        vec![
            self.test.display().to_string(),
            self.answer,
            format!("{:.6}", self.t_backend),
            format!("{:.6}", self.t_solver),
            self.paths.to_string(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn row(name: &str) -> Vec<String> {
        ReportRow {
            test: PathBuf::from(name),
            answer: "Timeout".to_string(),
            t_backend: 900.5,
            t_solver: 0.0,
            paths: 0,
        }
        .into_record()
    }

    fn lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| l.to_string())
            .collect()
    }

    #[test]
    fn create_writes_header_and_truncates() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("all.csv");
        fs::write(&path, "stale\nrows\nhere\n").unwrap();
        let table = ResultTable::create(&path, &REPORT_HEADER, TableMode::Direct).unwrap();
        assert_eq!(lines(table.path()), vec!["test,answer,t_backend,t_solver,paths"]);
    }

    #[test]
    fn direct_mode_persists_one_line_per_row() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("all.csv");
        let mut table = ResultTable::create(&path, &REPORT_HEADER, TableMode::Direct).unwrap();
        for n in 0..7 {
            table.add_row(row(&format!("b{}.c", n))).unwrap();
        }
        table.commit().unwrap();
        let lines = lines(&path);
        assert_eq!(lines.len(), 1 + 7);
        assert!(lines.iter().all(|l| l.split(',').count() == REPORT_HEADER.len()));
        assert_eq!(lines[1], "b0.c,Timeout,900.500000,0.000000,0");
    }

    #[test]
    fn buffered_mode_writes_only_on_commit() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("all.csv");
        let mut table = ResultTable::create(&path, &REPORT_HEADER, TableMode::Buffered).unwrap();
        table.add_row(row("a.c")).unwrap();
        table.add_row(row("b.c")).unwrap();
        assert_eq!(lines(&path).len(), 1);
        assert_eq!(table.pending(), 2);

        table.commit().unwrap();
        assert_eq!(lines(&path).len(), 3);
        assert_eq!(table.pending(), 0);

        table.commit().unwrap();
        assert_eq!(lines(&path).len(), 3, "second commit must not duplicate rows");
    }

    #[test]
    fn clear_discards_buffered_rows() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("all.csv");
        let mut table = ResultTable::create(&path, &REPORT_HEADER, TableMode::Buffered).unwrap();
        table.add_row(row("a.c")).unwrap();
        table.clear();
        table.commit().unwrap();
        assert_eq!(lines(&path).len(), 1);
    }

    #[test]
    fn mismatched_row_is_rejected_without_side_effects() {
        let tmp = TempDir::new().unwrap();
        for mode in [TableMode::Direct, TableMode::Buffered] {
            let path = tmp.path().join(format!("{:?}.csv", mode));
            let mut table = ResultTable::create(&path, &REPORT_HEADER, mode).unwrap();
            table.add_row(row("ok.c")).unwrap();
            let before = fs::read(&path).unwrap();
            let pending = table.pending();

            let err = table
                .add_row(vec!["short".to_string(), "row".to_string()])
                .expect_err("short row must be rejected");
            match err {
                TableError::RowLength { expected, actual } => {
                    assert_eq!(expected, 5);
                    assert_eq!(actual, 2);
                }
                other => panic!("unexpected error: {}", other),
            }
            assert_eq!(err_message(5, 6), "expected row length of '5' but got '6'");
            assert_eq!(fs::read(&path).unwrap(), before);
            assert_eq!(table.pending(), pending);
        }
    }

    fn err_message(expected: usize, actual: usize) -> String {
        TableError::RowLength { expected, actual }.to_string()
    }
}
