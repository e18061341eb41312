use crate::dates::parse_date;
use crate::models::{FilterCriteria, Lead, LeadField};
use std::collections::BTreeSet;

/// Returns the leads matching every active constraint, in input order.
pub fn filter_leads(leads: &[Lead], criteria: &FilterCriteria) -> Vec<Lead> {
    if criteria.is_empty() {
        return leads.to_vec();
    }

    let needle = criteria.search.trim().to_lowercase();
    leads
        .iter()
        .filter(|lead| matches_search(lead, &needle))
        .filter(|lead| matches_selections(lead, criteria))
        .filter(|lead| matches_date_range(lead, criteria))
        .cloned()
        .collect()
}

fn matches_search(lead: &Lead, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    lead.values()
        .any(|value| value.to_lowercase().contains(needle))
}

fn matches_selections(lead: &Lead, criteria: &FilterCriteria) -> bool {
    criteria
        .selections
        .iter()
        .filter(|(_, selected)| !selected.is_empty())
        .all(|(field, selected)| selected.contains(lead.get(*field)))
}

fn matches_date_range(lead: &Lead, criteria: &FilterCriteria) -> bool {
    let range = criteria.date_range;
    if range.is_open() {
        return true;
    }
    match parse_date(&lead.created_at) {
        Some(date) => range.contains(date),
        None => false,
    }
}

/// Sorted distinct non-empty values of a field, used for multi-select options.
pub fn distinct_values(leads: &[Lead], field: LeadField) -> Vec<String> {
    leads
        .iter()
        .map(|lead| lead.get(field))
        .filter(|value| !value.trim().is_empty())
        .map(ToString::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
