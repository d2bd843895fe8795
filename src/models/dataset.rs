use serde::{Deserialize, Serialize};

use crate::models::label::Label;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Header literals that give columns their meaning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnNames {
    pub title: String,
    pub organization: String,
    pub description: String,
    pub label: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            title: "TITLE".to_string(),
            organization: "COMPANY_NAME".to_string(),
            description: "JOB_DESCRIPTION".to_string(),
            label: "finalAnnotation".to_string(),
        }
    }
}

/// Remote identity of a loaded dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub id: String,
    pub name: String,
}

/// Column layout resolved once when a table is loaded.
///
/// Display fields are stored as offsets into [`Record::fields`], which holds
/// every non-label column in header order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<String>,
    label_position: usize,
    title: Option<usize>,
    organization: Option<usize>,
    description: Option<usize>,
}

impl Schema {
    fn resolve(headers: Vec<String>, names: &ColumnNames) -> Result<Self, DatasetError> {
        let mut columns = Vec::with_capacity(headers.len() + 1);
        for (i, header) in headers.into_iter().enumerate() {
            if header.trim().is_empty() {
                return Err(DatasetError::Parse(format!("column {} has an empty header", i + 1)));
            }
            if columns.contains(&header) {
                return Err(DatasetError::Parse(format!("duplicate column {header:?}")));
            }
            columns.push(header);
        }

        let label_position = match columns.iter().position(|c| *c == names.label) {
            Some(pos) => pos,
            None => {
                columns.push(names.label.clone());
                columns.len() - 1
            }
        };

        let field_offset = |name: &str| {
            columns
                .iter()
                .position(|c| c == name)
                .filter(|&pos| pos != label_position)
                .map(|pos| if pos > label_position { pos - 1 } else { pos })
        };

        Ok(Self {
            title: field_offset(&names.title),
            organization: field_offset(&names.organization),
            description: field_offset(&names.description),
            columns,
            label_position,
        })
    }

    /// All header names in file order, label column included.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn label_column(&self) -> &str {
        &self.columns[self.label_position]
    }

    pub fn title<'a>(&self, record: &'a Record) -> Option<&'a str> {
        self.title.and_then(|i| record.field(i))
    }

    pub fn organization<'a>(&self, record: &'a Record) -> Option<&'a str> {
        self.organization.and_then(|i| record.field(i))
    }

    pub fn description<'a>(&self, record: &'a Record) -> Option<&'a str> {
        self.description.and_then(|i| record.field(i))
    }
}

/// One row of the dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub index: usize,
    fields: Vec<String>,
    pub label: Option<Label>,
}

impl Record {
    pub fn field(&self, offset: usize) -> Option<&str> {
        self.fields.get(offset).map(String::as_str)
    }

    pub fn is_labeled(&self) -> bool {
        self.label.is_some()
    }
}

/// Labeled vs. total record counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub labeled: usize,
    pub total: usize,
}

impl Progress {
    /// Fraction of records labeled; an empty dataset counts as complete.
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.labeled as f64 / self.total as f64
        }
    }

    pub fn is_complete(&self) -> bool {
        self.labeled == self.total
    }
}

/// In-memory table plus its label column. Record order never changes, so a
/// record's index is its identity for the whole session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    file: FileRef,
    schema: Schema,
    records: Vec<Record>,
}

impl Dataset {
    /// Parse a CSV byte stream. A missing label column is created with every
    /// row unset. No partial dataset is produced on error.
    pub fn load(raw: &[u8], file: FileRef, names: &ColumnNames) -> Result<Self, DatasetError> {
        let raw = raw.strip_prefix(UTF8_BOM).unwrap_or(raw);

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_reader(raw);

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| DatasetError::Parse(e.to_string()))?
            .iter()
            .map(str::to_string)
            .collect();

        if headers.is_empty() {
            return Err(DatasetError::Parse("missing header row".to_string()));
        }

        let had_label_column = headers.iter().any(|h| *h == names.label);
        let schema = Schema::resolve(headers, names)?;

        let mut records = Vec::new();
        for (index, row) in reader.records().enumerate() {
            let row = row.map_err(|e| DatasetError::Parse(e.to_string()))?;

            let mut fields = Vec::with_capacity(row.len());
            let mut label = None;
            for (pos, cell) in row.iter().enumerate() {
                if had_label_column && pos == schema.label_position {
                    label = Label::parse_cell(cell)
                        .map_err(|e| DatasetError::Parse(format!("row {}: {e}", index + 1)))?;
                } else {
                    fields.push(cell.to_string());
                }
            }

            records.push(Record {
                index,
                fields,
                label,
            });
        }

        tracing::debug!(
            file_id = %file.id,
            rows = records.len(),
            columns = schema.columns.len(),
            label_column_created = !had_label_column,
            "Dataset loaded"
        );

        Ok(Self {
            file,
            schema,
            records,
        })
    }

    /// Assign `label` to the record at `index`, returning its previous label.
    pub fn set_label(&mut self, index: usize, label: Label) -> Result<Option<Label>, DatasetError> {
        let len = self.records.len();
        let record = self
            .records
            .get_mut(index)
            .ok_or(DatasetError::IndexOutOfRange { index, len })?;
        Ok(record.label.replace(label))
    }

    pub fn progress(&self) -> Progress {
        Progress {
            labeled: self.records.iter().filter(|r| r.is_labeled()).count(),
            total: self.records.len(),
        }
    }

    /// Serialize the whole table back to CSV in its original column order.
    pub fn to_csv(&self) -> Result<Vec<u8>, DatasetError> {
        let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());

        writer
            .write_record(&self.schema.columns)
            .map_err(|e| DatasetError::Serialize(e.to_string()))?;

        let label_position = self.schema.label_position;
        for record in &self.records {
            let label_cell = record
                .label
                .map(|l| l.as_u8().to_string())
                .unwrap_or_default();

            let mut row: Vec<&str> = Vec::with_capacity(self.schema.columns.len());
            row.extend(record.fields[..label_position].iter().map(String::as_str));
            row.push(&label_cell);
            row.extend(record.fields[label_position..].iter().map(String::as_str));

            writer
                .write_record(&row)
                .map_err(|e| DatasetError::Serialize(e.to_string()))?;
        }

        writer
            .into_inner()
            .map_err(|e| DatasetError::Serialize(e.to_string()))
    }

    pub fn file(&self) -> &FileRef {
        &self.file
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn get(&self, index: usize) -> Option<&Record> {
        self.records.get(index)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("Failed to parse table: {0}")]
    Parse(String),

    #[error("Record index {index} out of range for dataset of {len} rows")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Failed to serialize table: {0}")]
    Serialize(String),
}
