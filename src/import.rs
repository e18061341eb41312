use crate::errors::{AppError, AppResult};
use crate::models::{Lead, LeadField};
use crate::source::headers::normalize_header;
use csv::{ReaderBuilder, Trim, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// CSV column name -> lead field key. Keys that are not canonical fields are
/// carried as extra fields; an empty target skips the column.
pub type ColumnMapping = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

pub fn parse_csv(text: &str) -> AppResult<CsvTable> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::Headers)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()?
        .iter()
        .map(|header| header.trim_start_matches('\u{feff}').to_string())
        .collect::<Vec<_>>();
    if headers.iter().all(|header| header.is_empty()) {
        return Err(AppError::Csv("CSV has no header row".to_string()));
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(|value| value.trim().is_empty()) {
            continue;
        }
        rows.push(record.iter().map(ToString::to_string).collect());
    }

    Ok(CsvTable { headers, rows })
}

/// Proposes a mapping for every header that normalizes onto a known field.
pub fn suggest_mapping(headers: &[String]) -> ColumnMapping {
    let mut claimed = BTreeSet::new();
    headers
        .iter()
        .filter_map(|header| {
            let field = normalize_header(header)?;
            claimed
                .insert(field)
                .then(|| (header.clone(), field.key().to_string()))
        })
        .collect()
}

/// Builds leads from CSV rows. Unmapped fields stay empty and ids are left
/// for the source to assign unless a column is mapped to `id`.
pub fn map_rows(table: &CsvTable, mapping: &ColumnMapping) -> Vec<Lead> {
    let targets = table
        .headers
        .iter()
        .map(|header| {
            mapping
                .get(header)
                .map(|target| target.trim())
                .filter(|target| !target.is_empty())
        })
        .collect::<Vec<_>>();

    table
        .rows
        .iter()
        .map(|row| {
            let mut lead = Lead::default();
            for (index, target) in targets.iter().enumerate() {
                let Some(target) = target else {
                    continue;
                };
                let value = row.get(index).map(|value| value.trim()).unwrap_or_default();
                lead.set_value(target, value);
            }
            lead
        })
        .collect()
}

pub fn import_csv(text: &str, mapping: &ColumnMapping) -> AppResult<Vec<Lead>> {
    let table = parse_csv(text)?;
    let unknown = mapping
        .keys()
        .filter(|column| !table.headers.contains(column))
        .cloned()
        .collect::<Vec<_>>();
    if !unknown.is_empty() {
        return Err(AppError::InvalidInput(format!(
            "mapping names columns missing from the CSV: {}",
            unknown.join(", ")
        )));
    }

    let leads = map_rows(&table, mapping);
    tracing::info!(rows = leads.len(), mapped_columns = mapping.len(), "mapped CSV rows to leads");
    Ok(leads)
}

/// Writes leads as CSV using field keys as headers, followed by any extra
/// columns present on the leads.
pub fn export_csv(leads: &[Lead], columns: &[LeadField]) -> AppResult<String> {
    let extras = leads
        .iter()
        .flat_map(|lead| lead.extra.keys().cloned())
        .collect::<BTreeSet<_>>();

    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    let header = columns
        .iter()
        .map(|field| field.key().to_string())
        .chain(extras.iter().cloned())
        .collect::<Vec<_>>();
    writer.write_record(&header)?;

    for lead in leads {
        let record = columns
            .iter()
            .map(|field| lead.get(*field).to_string())
            .chain(
                extras
                    .iter()
                    .map(|key| lead.extra.get(key).cloned().unwrap_or_default()),
            )
            .collect::<Vec<_>>();
        writer.write_record(&record)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|error| AppError::Io(error.to_string()))?;
    String::from_utf8(bytes).map_err(|error| AppError::Internal(error.to_string()))
}

#[cfg(test)]
mod tests {
    use super::{export_csv, import_csv, map_rows, parse_csv, suggest_mapping, ColumnMapping};
    use crate::errors::AppError;
    use crate::models::{Lead, LeadField};

    const SAMPLE: &str = "Full Name,Email,Mobile No,Campaign\n\
                          Ada Lovelace,ada@example.com,555-0100,Spring\n\
                          ,,,\n\
                          Grace Hopper,grace@example.com,555-0101,Fall\n";

    #[test]
    fn partial_mapping_defaults_everything_else() {
        let mut mapping = ColumnMapping::new();
        mapping.insert("Email".to_string(), "email".to_string());

        let leads = import_csv(SAMPLE, &mapping).expect("import");
        assert_eq!(leads.len(), 2);
        assert_eq!(leads[0].email, "ada@example.com");
        assert_eq!(leads[1].email, "grace@example.com");
        for lead in &leads {
            let mut expected = Lead::default();
            expected.email = lead.email.clone();
            assert_eq!(lead, &expected);
        }
    }

    #[test]
    fn suggested_mapping_covers_known_headers() {
        let table = parse_csv(SAMPLE).expect("parse");
        let mapping = suggest_mapping(&table.headers);
        assert_eq!(mapping.get("Full Name").map(String::as_str), Some("name"));
        assert_eq!(mapping.get("Mobile No").map(String::as_str), Some("phone"));
        assert!(!mapping.contains_key("Campaign"));

        let leads = map_rows(&table, &mapping);
        assert_eq!(leads[1].name, "Grace Hopper");
        assert_eq!(leads[1].phone, "555-0101");
        assert!(leads[1].id.is_empty());
    }

    #[test]
    fn non_canonical_targets_become_extra_fields() {
        let mut mapping = ColumnMapping::new();
        mapping.insert("Campaign".to_string(), "campaign".to_string());
        mapping.insert("Email".to_string(), "".to_string());
        let leads = import_csv(SAMPLE, &mapping).expect("import");
        assert_eq!(leads[0].extra.get("campaign").map(String::as_str), Some("Spring"));
        assert_eq!(leads[0].email, "");
    }

    #[test]
    fn mapping_unknown_columns_is_rejected() {
        let mut mapping = ColumnMapping::new();
        mapping.insert("Phone Number".to_string(), "phone".to_string());
        let err = import_csv(SAMPLE, &mapping).expect_err("unknown column");
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[test]
    fn export_reimports_with_suggested_mapping() {
        let mut lead = Lead::new("7")
            .with(LeadField::Name, "Ada, Countess")
            .with(LeadField::Status, "Hot");
        lead.extra.insert("Budget".to_string(), "10k".to_string());
        let csv = export_csv(&[lead.clone()], &[LeadField::Id, LeadField::Name, LeadField::Status])
            .expect("export");
        assert!(csv.starts_with("id,name,status,Budget\n"));

        let table = parse_csv(&csv).expect("parse export");
        let mut mapping = suggest_mapping(&table.headers);
        mapping.insert("Budget".to_string(), "Budget".to_string());
        assert_eq!(map_rows(&table, &mapping), vec![lead]);
    }
}
