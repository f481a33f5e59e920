//! Landing layer: raw per-source tables exactly as the utilities emit them.
//!
//! Nothing here interprets values; column names are only trimmed and
//! lower-cased so adapters can look them up consistently.

pub mod csv_file;

use gridflow_client::domain::SourceId;
use serde::{Deserialize, Serialize};

/// Tokens that exports use for "no value".
const NULL_TOKENS: [&str; 4] = ["nan", "null", "none", "na"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    ServicePoints,
    Meters,
    Intervals,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [Self::ServicePoints, Self::Meters, Self::Intervals];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ServicePoints => "service_points",
            Self::Meters => "meters",
            Self::Intervals => "intervals",
        }
    }
}

/// One landed table: a header plus string cells, in file order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawTable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            columns: columns
                .into_iter()
                .map(|c| c.as_ref().trim().to_lowercase())
                .collect(),
            rows: Vec::new(),
        }
    }

    /// Convenience constructor for literal tables.
    pub fn from_rows(columns: &[&str], rows: &[&[&str]]) -> Self {
        let mut table = Self::new(columns);
        for row in rows {
            table.push_row(row.iter().map(|v| v.to_string()).collect());
        }
        table
    }

    /// Short rows are padded with blanks; extra cells are kept but unreachable.
    pub fn push_row(&mut self, mut row: Vec<String>) {
        if row.len() < self.columns.len() {
            row.resize(self.columns.len(), String::new());
        }
        self.rows.push(row);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn records(&self) -> impl Iterator<Item = RawRecord<'_>> {
        self.rows.iter().map(move |values| RawRecord { table: self, values })
    }
}

/// A single row viewed through its table's header.
#[derive(Debug, Clone, Copy)]
pub struct RawRecord<'a> {
    table: &'a RawTable,
    values: &'a [String],
}

impl<'a> RawRecord<'a> {
    /// `None` when the column does not exist, `Some(None)` when the cell is
    /// blank or a null token, `Some(Some(text))` otherwise.
    pub fn get(&self, column: &str) -> Option<Option<&'a str>> {
        let idx = self.table.column_index(column)?;
        let cell = self.values.get(idx).map(|v| v.trim()).unwrap_or("");
        if cell.is_empty() || NULL_TOKENS.iter().any(|t| cell.eq_ignore_ascii_case(t)) {
            Some(None)
        } else {
            Some(Some(cell))
        }
    }
}

/// The three landed tables of one source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceLanding {
    pub source_id: SourceId,
    pub service_points: RawTable,
    pub meters: RawTable,
    pub intervals: RawTable,
}

impl SourceLanding {
    pub fn table(&self, kind: EntityKind) -> &RawTable {
        match kind {
            EntityKind::ServicePoints => &self.service_points,
            EntityKind::Meters => &self.meters,
            EntityKind::Intervals => &self.intervals,
        }
    }

    pub fn counts(&self) -> LandingCounts {
        LandingCounts {
            service_points: self.service_points.len() as u64,
            meters: self.meters.len() as u64,
            intervals: self.intervals.len() as u64,
        }
    }
}

/// Row counts as delivered by the landing collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LandingCounts {
    pub service_points: u64,
    pub meters: u64,
    pub intervals: u64,
}

impl LandingCounts {
    pub fn get(&self, kind: EntityKind) -> u64 {
        match kind {
            EntityKind::ServicePoints => self.service_points,
            EntityKind::Meters => self.meters,
            EntityKind::Intervals => self.intervals,
        }
    }
}
