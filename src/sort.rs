use crate::dates::parse_timestamp;
use crate::models::{FieldKind, Lead, SortConfig, SortDirection};
use std::cmp::Ordering;

/// Returns a sorted copy; `None` keeps input order. The sort is stable, so
/// ties keep their relative input order.
pub fn sort_leads(leads: &[Lead], config: Option<&SortConfig>) -> Vec<Lead> {
    let mut sorted = leads.to_vec();
    let Some(config) = config else {
        return sorted;
    };

    sorted.sort_by(|a, b| {
        let ordering = compare_values(a.get(config.field), b.get(config.field), config.field.kind());
        match config.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    });
    sorted
}

/// Timestamp fields order parsed values chronologically ahead of anything
/// unparsable; the unparsable tail and all text fields use [`collate`].
pub fn compare_values(a: &str, b: &str, kind: FieldKind) -> Ordering {
    if kind == FieldKind::Timestamp {
        let ordering = match (parse_timestamp(a), parse_timestamp(b)) {
            (Some(left), Some(right)) => left.cmp(&right),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        return ordering.then_with(|| collate(a, b));
    }
    collate(a, b)
}

/// Approximates locale collation: case-insensitive first, lowercase ahead of
/// uppercase when the letters tie.
pub fn collate(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b).reverse())
}
