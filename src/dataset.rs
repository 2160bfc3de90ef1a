//! Tabular dataset with one designated integer label column.
//!
//! Cells are numeric or missing. The bundled reference dataset is compiled
//! into the binary; any other headed CSV file can be loaded by naming its
//! label column.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, WriterBuilder};
use tracing::debug;

use crate::error::DatasetError;

/// Label column of the bundled reference dataset.
pub const DEFAULT_LABEL_COLUMN: &str = "target";

/// Field values read as missing cells, the pandas `read_csv` defaults.
const MISSING_MARKERS: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

const IRIS_CSV: &str = include_str!("../data/iris.csv");

/// Static datasets shipped with the binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReferenceDataset {
    /// Fisher's Iris measurements, 150 rows, three classes.
    #[default]
    Iris,
}

impl ReferenceDataset {
    /// Logged as the `dataset` parameter.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Iris => "iris",
        }
    }

    /// Stem of the raw output file, `raw_<stem>.csv`.
    pub const fn file_stem(self) -> &'static str {
        match self {
            Self::Iris => "iris",
        }
    }

    const fn csv(self) -> &'static str {
        match self {
            Self::Iris => IRIS_CSV,
        }
    }

    /// Parses the embedded table.
    pub fn load(self) -> Result<Dataset, DatasetError> {
        Ok(
            Dataset::from_reader(self.name(), self.csv().as_bytes(), DEFAULT_LABEL_COLUMN)?
                .with_file_stem(self.file_stem()),
        )
    }
}

/// Where the runner takes its dataset from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetSource {
    /// A dataset bundled with the binary.
    Reference(ReferenceDataset),
    /// A headed CSV file on disk. `name` and `file_stem` default to the
    /// file's own stem.
    Csv {
        path: PathBuf,
        label_column: String,
        name: Option<String>,
        file_stem: Option<String>,
    },
}

impl Default for DatasetSource {
    fn default() -> Self {
        Self::Reference(ReferenceDataset::default())
    }
}

impl DatasetSource {
    pub fn load(&self) -> Result<Dataset, DatasetError> {
        match self {
            Self::Reference(reference) => reference.load(),
            Self::Csv {
                path,
                label_column,
                name,
                file_stem,
            } => {
                let file = File::open(path).map_err(|source| DatasetError::Io {
                    path: path.clone(),
                    source,
                })?;
                let path_stem = path
                    .file_stem()
                    .map_or_else(|| "dataset".to_string(), |s| s.to_string_lossy().into_owned());
                let name = name.as_deref().unwrap_or(&path_stem);
                let stem = file_stem.as_deref().unwrap_or(&path_stem);
                Ok(Dataset::from_reader(name, file, label_column)?.with_file_stem(stem))
            }
        }
    }
}

/// An immutable table: feature cells plus one integer label per row.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    name: String,
    file_stem: String,
    columns: Vec<String>,
    label_index: usize,
    /// Non-label cells per row, in column order.
    features: Vec<Vec<Option<f64>>>,
    labels: Vec<i64>,
}

impl Dataset {
    /// Reads a headed CSV table. The file stem starts out equal to `name`.
    pub fn from_reader<R: Read>(
        name: &str,
        reader: R,
        label_column: &str,
    ) -> Result<Self, DatasetError> {
        let mut rdr = ReaderBuilder::new().has_headers(true).from_reader(reader);

        let columns: Vec<String> = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();
        let label_index = columns
            .iter()
            .position(|c| c == label_column)
            .ok_or_else(|| DatasetError::MissingLabelColumn(label_column.to_string()))?;

        let mut features = Vec::new();
        let mut labels = Vec::new();

        for (i, record) in rdr.records().enumerate() {
            let record = record?;
            let row = i + 1;
            let mut cells = Vec::with_capacity(columns.len() - 1);

            for (j, field) in record.iter().enumerate() {
                let field = field.trim();
                if j == label_index {
                    labels.push(parse_label(row, field)?);
                } else if is_missing(field) {
                    cells.push(None);
                } else {
                    let value = field.parse::<f64>().map_err(|_| DatasetError::NonNumeric {
                        row,
                        column: columns[j].clone(),
                        value: field.to_string(),
                    })?;
                    // NaN spellings outside the marker list ("NAN", "+nan") are missing too.
                    cells.push((!value.is_nan()).then_some(value));
                }
            }
            features.push(cells);
        }

        if labels.is_empty() {
            return Err(DatasetError::Empty);
        }

        debug!(
            dataset = name,
            rows = labels.len(),
            cols = columns.len(),
            "Loaded dataset"
        );

        Ok(Self {
            name: name.to_string(),
            file_stem: name.to_string(),
            columns,
            label_index,
            features,
            labels,
        })
    }

    #[must_use]
    pub fn with_file_stem(mut self, file_stem: &str) -> Self {
        self.file_stem = file_stem.to_string();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn label_column(&self) -> &str {
        &self.columns[self.label_index]
    }

    pub fn labels(&self) -> &[i64] {
        &self.labels
    }

    pub fn n_rows(&self) -> usize {
        self.labels.len()
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    /// Number of missing cells across the whole table.
    pub fn missing_count(&self) -> usize {
        self.features
            .iter()
            .flatten()
            .filter(|cell| cell.is_none())
            .count()
    }

    /// File name used when persisting the raw table.
    pub fn raw_file_name(&self) -> String {
        format!("raw_{}.csv", self.file_stem)
    }

    /// Writes the table as CSV: header row, no index, empty missing cells.
    pub fn write_csv(&self, path: &Path) -> Result<(), DatasetError> {
        let io_err = |source| DatasetError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = File::create(path).map_err(io_err)?;
        self.write_csv_to(file)?;
        debug!(path = %path.display(), "Wrote dataset");
        Ok(())
    }

    pub fn write_csv_to<W: Write>(&self, writer: W) -> Result<(), DatasetError> {
        let mut wtr = WriterBuilder::new().from_writer(writer);
        wtr.write_record(&self.columns)?;

        for (cells, label) in self.features.iter().zip(&self.labels) {
            let mut record: Vec<String> = cells
                .iter()
                .map(|cell| cell.map(format_value).unwrap_or_default())
                .collect();
            record.insert(self.label_index, label.to_string());
            wtr.write_record(&record)?;
        }

        wtr.flush().map_err(|e| DatasetError::Csv(e.into()))?;
        Ok(())
    }
}

fn is_missing(field: &str) -> bool {
    MISSING_MARKERS.contains(&field)
}

#[allow(clippy::cast_possible_truncation)]
fn parse_label(row: usize, field: &str) -> Result<i64, DatasetError> {
    if is_missing(field) {
        return Err(DatasetError::MissingLabel { row });
    }
    if let Ok(v) = field.parse::<i64>() {
        return Ok(v);
    }
    match field.parse::<f64>() {
        Ok(v) if v.is_nan() => Err(DatasetError::MissingLabel { row }),
        // Integral floats such as "1.0" are accepted.
        Ok(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < 9.0e15 => Ok(v as i64),
        _ => Err(DatasetError::NonIntegerLabel {
            row,
            value: field.to_string(),
        }),
    }
}

/// Formats a cell so that integral values keep one decimal place.
fn format_value(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1.0e15 {
        format!("{v:.1}")
    } else {
        v.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn load(csv: &str) -> Dataset {
        Dataset::from_reader("t", csv.as_bytes(), "target").unwrap()
    }

    fn write(ds: &Dataset) -> String {
        let mut out = Vec::new();
        ds.write_csv_to(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_reference_dataset_shape() {
        let ds = ReferenceDataset::Iris.load().unwrap();
        assert_eq!(ds.name(), "iris");
        assert_eq!(ds.n_rows(), 150);
        assert_eq!(ds.n_cols(), 5);
        assert_eq!(ds.label_column(), "target");
        assert_eq!(ds.missing_count(), 0);
        assert_eq!(ds.raw_file_name(), "raw_iris.csv");
    }

    #[test]
    fn test_reference_dataset_writes_back_verbatim() {
        let ds = ReferenceDataset::Iris.load().unwrap();
        assert_eq!(write(&ds), IRIS_CSV);
    }

    #[test]
    fn test_missing_markers_become_empty_cells() {
        let ds = load("a,b,target\n1.5,NA,0\n,2,1\nnan,3.25,1\n");
        assert_eq!(ds.missing_count(), 3);
        assert_eq!(ds.labels(), &[0, 1, 1]);
        assert_eq!(write(&ds), "a,b,target\n1.5,,0\n,2.0,1\n,3.25,1\n");
    }

    #[test]
    fn test_pandas_missing_markers_are_recognised() {
        for marker in MISSING_MARKERS {
            let ds = load(&format!("a,target\n{marker},0\n"));
            assert_eq!(ds.missing_count(), 1, "marker {marker:?}");
        }
    }

    #[test]
    fn test_nan_spellings_survive_write_and_reload() {
        for cell in ["NAN", "-nan", "+NaN", "None", "NULL", "n/a", "<NA>", "#N/A", "-NaN"] {
            let ds = load(&format!("a,target\n{cell},0\n2,1\n"));
            assert_eq!(ds.missing_count(), 1, "cell {cell:?}");

            let written = write(&ds);
            assert_eq!(written, "a,target\n,0\n2.0,1\n", "cell {cell:?}");
            assert_eq!(load(&written).missing_count(), 1, "cell {cell:?}");
        }
    }

    #[test]
    fn test_label_column_keeps_its_position() {
        let ds = load("target,x\n2,0.5\n1.0,1\n");
        assert_eq!(ds.labels(), &[2, 1]);
        assert_eq!(write(&ds), "target,x\n2,0.5\n1,1.0\n");
    }

    #[test]
    fn test_unknown_label_column_is_rejected() {
        let err = Dataset::from_reader("t", "a,b\n1,2\n".as_bytes(), "target").unwrap_err();
        assert!(matches!(err, DatasetError::MissingLabelColumn(c) if c == "target"));
    }

    #[test]
    fn test_missing_label_is_rejected() {
        for csv in ["a,target\n1,0\n2,\n", "a,target\n1,0\n2,NAN\n"] {
            let err = Dataset::from_reader("t", csv.as_bytes(), "target").unwrap_err();
            assert!(matches!(err, DatasetError::MissingLabel { row: 2 }), "{csv:?}");
        }
    }

    #[test]
    fn test_fractional_label_is_rejected() {
        let err =
            Dataset::from_reader("t", "a,target\n1,0.5\n".as_bytes(), "target").unwrap_err();
        assert!(matches!(err, DatasetError::NonIntegerLabel { row: 1, .. }));
    }

    #[test]
    fn test_text_feature_is_rejected() {
        let err =
            Dataset::from_reader("t", "a,target\nred,0\n".as_bytes(), "target").unwrap_err();
        assert!(matches!(
            err,
            DatasetError::NonNumeric { row: 1, ref column, .. } if column == "a"
        ));
    }

    #[test]
    fn test_header_only_is_empty() {
        let err = Dataset::from_reader("t", "a,target\n".as_bytes(), "target").unwrap_err();
        assert!(matches!(err, DatasetError::Empty));
    }

    #[test]
    fn test_csv_source_defaults_to_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wdbc.csv");
        fs::write(&path, "radius,diagnosis\n17.99,0\n20.57,1\n").unwrap();

        let source = DatasetSource::Csv {
            path,
            label_column: "diagnosis".to_string(),
            name: None,
            file_stem: None,
        };
        let ds = source.load().unwrap();
        assert_eq!(ds.name(), "wdbc");
        assert_eq!(ds.raw_file_name(), "raw_wdbc.csv");
        assert_eq!(ds.n_rows(), 2);
        assert_eq!(ds.label_column(), "diagnosis");
    }

    #[test]
    fn test_csv_source_name_and_stem_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("breast_cancer.csv");
        fs::write(&path, "mean radius,target\n17.99,0\n13.54,1\n").unwrap();

        let source = DatasetSource::Csv {
            path,
            label_column: DEFAULT_LABEL_COLUMN.to_string(),
            name: Some("breast_cancer_wisconsin".to_string()),
            file_stem: Some("bc".to_string()),
        };
        let ds = source.load().unwrap();
        assert_eq!(ds.name(), "breast_cancer_wisconsin");
        assert_eq!(ds.raw_file_name(), "raw_bc.csv");
    }

    #[test]
    fn test_csv_source_missing_file_is_io_error() {
        let source = DatasetSource::Csv {
            path: PathBuf::from("/nonexistent/data.csv"),
            label_column: DEFAULT_LABEL_COLUMN.to_string(),
            name: None,
            file_stem: None,
        };
        assert!(matches!(source.load(), Err(DatasetError::Io { .. })));
    }
}
