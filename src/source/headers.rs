use crate::models::{Lead, LeadField, FOLLOW_UP_SLOTS};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};

static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("valid header regex"));

static HEADER_ALIASES: Lazy<HashMap<String, LeadField>> = Lazy::new(|| {
    let mut aliases = HashMap::new();
    let mut add = |field: LeadField, names: &[&str]| {
        for name in names {
            aliases.insert(name.to_string(), field);
        }
    };

    add(LeadField::Id, &["id", "leadid", "uid", "rowid"]);
    add(LeadField::Name, &["name", "leadname", "fullname", "customername", "clientname"]);
    add(LeadField::Email, &["email", "emailid", "emailaddress", "mail"]);
    add(
        LeadField::Phone,
        &["phone", "phonenumber", "phoneno", "mobile", "mobilenumber", "mobileno", "contactnumber"],
    );
    add(LeadField::Source, &["source", "leadsource", "channel"]);
    add(LeadField::Associate, &["associate", "salesassociate", "assignedto", "owner"]);
    add(LeadField::Center, &["center", "centre", "branch", "location"]);
    add(LeadField::Stage, &["stage", "leadstage", "pipelinestage"]);
    add(LeadField::Status, &["status", "leadstatus"]);
    add(
        LeadField::CreatedAt,
        &["createdat", "createdon", "created", "createddate", "date", "timestamp"],
    );
    add(LeadField::Remarks, &["remarks", "remark", "notes", "note", "comments"]);

    let date_fields = [
        LeadField::FollowUp1Date,
        LeadField::FollowUp2Date,
        LeadField::FollowUp3Date,
        LeadField::FollowUp4Date,
    ];
    let comment_fields = [
        LeadField::FollowUp1Comment,
        LeadField::FollowUp2Comment,
        LeadField::FollowUp3Comment,
        LeadField::FollowUp4Comment,
    ];
    for slot in 0..FOLLOW_UP_SLOTS {
        let n = slot + 1;
        add(
            date_fields[slot],
            &[
                format!("followup{n}date").as_str(),
                format!("followupdate{n}").as_str(),
                format!("fu{n}date").as_str(),
            ],
        );
        add(
            comment_fields[slot],
            &[
                format!("followup{n}comment").as_str(),
                format!("followup{n}comments").as_str(),
                format!("followup{n}remarks").as_str(),
                format!("followupcomment{n}").as_str(),
                format!("fu{n}comment").as_str(),
            ],
        );
    }

    aliases
});

fn squash(header: &str) -> String {
    NON_ALNUM.replace_all(&header.trim().to_lowercase(), "").into_owned()
}

/// Maps a spreadsheet header spelling ("Lead Name", "E-mail", "Follow Up 2
/// Comments", ...) onto a canonical field.
pub fn normalize_header(header: &str) -> Option<LeadField> {
    HEADER_ALIASES.get(&squash(header)).copied()
}

/// Builds a lead from one sheet row. Exact field keys claim their field ahead
/// of alias spellings; a header whose field is already claimed, or that maps
/// to no field, is kept verbatim as an extra column.
pub fn lead_from_row(row: &BTreeMap<String, String>) -> Lead {
    let mut lead = Lead::default();
    let mut claimed = HashSet::new();
    let (exact, rest): (Vec<_>, Vec<_>) = row
        .iter()
        .partition(|(header, _)| LeadField::from_key(header).is_some());

    for (header, value) in exact {
        match LeadField::from_key(header) {
            Some(field) if claimed.insert(field) => lead.set(field, value.trim()),
            _ => keep_extra(&mut lead, header, value),
        }
    }
    for (header, value) in rest {
        match normalize_header(header) {
            Some(field) if claimed.insert(field) => lead.set(field, value.trim()),
            _ => keep_extra(&mut lead, header, value),
        }
    }
    lead
}

fn keep_extra(lead: &mut Lead, header: &str, value: &str) {
    let key = header.trim();
    if !key.is_empty() {
        lead.extra.insert(key.to_string(), value.to_string());
    }
}

/// Flattens a lead back into canonical sheet columns plus its extras.
pub fn lead_to_row(lead: &Lead) -> BTreeMap<String, String> {
    let mut row = LeadField::ALL
        .into_iter()
        .map(|field| (field.key().to_string(), lead.get(field).to_string()))
        .collect::<BTreeMap<_, _>>();
    for (key, value) in &lead.extra {
        row.entry(key.clone()).or_insert_with(|| value.clone());
    }
    row
}
