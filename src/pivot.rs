use crate::models::{AggregationMode, KanbanColumn, Lead, LeadField, PivotConfig, PivotField};
use crate::sort::collate;
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

pub const MISSING_KEY: &str = "N/A";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PivotTable {
    pub row_keys: Vec<String>,
    pub column_keys: Vec<String>,
    /// `matrix[row][column]`, aligned with `row_keys` and `column_keys`.
    pub matrix: Vec<Vec<f64>>,
    pub row_totals: Vec<f64>,
    pub column_totals: Vec<f64>,
    pub grand_total: f64,
}

impl PivotTable {
    pub fn cell(&self, row: &str, column: &str) -> Option<f64> {
        let row_index = self.row_keys.iter().position(|key| key == row)?;
        let column_index = self.column_keys.iter().position(|key| key == column)?;
        Some(self.matrix[row_index][column_index])
    }

    pub fn row_total(&self, row: &str) -> Option<f64> {
        let index = self.row_keys.iter().position(|key| key == row)?;
        Some(self.row_totals[index])
    }

    pub fn column_total(&self, column: &str) -> Option<f64> {
        let index = self.column_keys.iter().position(|key| key == column)?;
        Some(self.column_totals[index])
    }
}

enum Cell {
    Count(usize),
    Unique(HashSet<String>),
    Sum(f64),
    Average { sum: f64, count: usize },
}

impl Cell {
    fn new(mode: AggregationMode) -> Self {
        match mode {
            AggregationMode::Count => Self::Count(0),
            AggregationMode::UniqueCount => Self::Unique(HashSet::new()),
            AggregationMode::Sum => Self::Sum(0.0),
            AggregationMode::Average => Self::Average { sum: 0.0, count: 0 },
        }
    }

    fn add(&mut self, lead: &Lead, value_field: Option<LeadField>) {
        match self {
            Self::Count(count) => *count += 1,
            Self::Unique(keys) => {
                let key = lead.get(value_field.unwrap_or(LeadField::Email)).trim();
                if !key.is_empty() {
                    keys.insert(key.to_lowercase());
                }
            }
            Self::Sum(sum) => *sum += numeric_value(lead, value_field),
            Self::Average { sum, count } => {
                *sum += numeric_value(lead, value_field);
                *count += 1;
            }
        }
    }

    fn value(&self) -> f64 {
        match self {
            Self::Count(count) => *count as f64,
            Self::Unique(keys) => keys.len() as f64,
            Self::Sum(sum) => *sum,
            Self::Average { sum, count } => {
                if *count == 0 {
                    0.0
                } else {
                    sum / *count as f64
                }
            }
        }
    }
}

fn numeric_value(lead: &Lead, value_field: Option<LeadField>) -> f64 {
    let Some(field) = value_field else {
        return 1.0;
    };
    lead.get(field)
        .trim()
        .replace(',', "")
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .unwrap_or(0.0)
}

/// Resolves the grouping key of a lead; empty or unresolvable values map to
/// [`MISSING_KEY`].
pub fn pivot_key(lead: &Lead, field: PivotField) -> String {
    let key = match field {
        PivotField::Field(field) => {
            let value = lead.get(field).trim();
            (!value.is_empty()).then(|| value.to_string())
        }
        PivotField::CreatedYear => lead.created_timestamp().map(|at| at.year().to_string()),
        PivotField::CreatedMonth => lead.created_timestamp().map(|at| format!("{:02}", at.month())),
    };
    key.unwrap_or_else(|| MISSING_KEY.to_string())
}

fn sorted_keys<'a>(keys: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut distinct = keys.cloned().collect::<HashSet<_>>().into_iter().collect::<Vec<_>>();
    distinct.sort_by(|a, b| collate(a, b));
    distinct
}

/// Builds the full row x column matrix from scratch. Totals are plain sums
/// over the matrix, whatever the aggregation mode.
pub fn build_pivot(leads: &[Lead], config: &PivotConfig) -> PivotTable {
    let keyed = leads
        .iter()
        .map(|lead| (pivot_key(lead, config.rows), pivot_key(lead, config.columns), lead))
        .collect::<Vec<_>>();

    let row_keys = sorted_keys(keyed.iter().map(|(row, _, _)| row));
    let column_keys = sorted_keys(keyed.iter().map(|(_, column, _)| column));
    let row_index = index_of(&row_keys);
    let column_index = index_of(&column_keys);

    let mut cells = row_keys
        .iter()
        .map(|_| column_keys.iter().map(|_| Cell::new(config.aggregation)).collect::<Vec<_>>())
        .collect::<Vec<_>>();

    for (row, column, lead) in &keyed {
        let (Some(&r), Some(&c)) = (row_index.get(row.as_str()), column_index.get(column.as_str())) else {
            continue;
        };
        cells[r][c].add(lead, config.value_field);
    }

    let matrix = cells
        .iter()
        .map(|row| row.iter().map(Cell::value).collect::<Vec<_>>())
        .collect::<Vec<_>>();
    let row_totals = matrix.iter().map(|row| row.iter().sum()).collect::<Vec<f64>>();
    let column_totals = (0..column_keys.len())
        .map(|c| matrix.iter().map(|row| row[c]).sum())
        .collect::<Vec<f64>>();
    let grand_total = row_totals.iter().sum();

    PivotTable {
        row_keys,
        column_keys,
        matrix,
        row_totals,
        column_totals,
        grand_total,
    }
}

fn index_of(keys: &[String]) -> HashMap<&str, usize> {
    keys.iter()
        .enumerate()
        .map(|(index, key)| (key.as_str(), index))
        .collect()
}

/// Kanban columns in first-seen order.
pub fn group_leads(leads: &[Lead], field: LeadField) -> Vec<KanbanColumn> {
    let mut columns: Vec<KanbanColumn> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    for lead in leads {
        let key = pivot_key(lead, PivotField::Field(field));
        let index = *positions.entry(key.clone()).or_insert_with(|| {
            columns.push(KanbanColumn {
                key,
                leads: Vec::new(),
            });
            columns.len() - 1
        });
        columns[index].leads.push(lead.clone());
    }
    columns
}
