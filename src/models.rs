use crate::dates::parse_timestamp;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const FOLLOW_UP_SLOTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LeadField {
    Id,
    Name,
    Email,
    Phone,
    Source,
    Associate,
    Center,
    Stage,
    Status,
    CreatedAt,
    Remarks,
    FollowUp1Date,
    FollowUp1Comment,
    FollowUp2Date,
    FollowUp2Comment,
    FollowUp3Date,
    FollowUp3Comment,
    FollowUp4Date,
    FollowUp4Comment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Timestamp,
}

impl LeadField {
    pub const ALL: [LeadField; 19] = [
        Self::Id,
        Self::Name,
        Self::Email,
        Self::Phone,
        Self::Source,
        Self::Associate,
        Self::Center,
        Self::Stage,
        Self::Status,
        Self::CreatedAt,
        Self::Remarks,
        Self::FollowUp1Date,
        Self::FollowUp1Comment,
        Self::FollowUp2Date,
        Self::FollowUp2Comment,
        Self::FollowUp3Date,
        Self::FollowUp3Comment,
        Self::FollowUp4Date,
        Self::FollowUp4Comment,
    ];

    /// Fields offered as multi-select filters.
    pub const CATEGORICAL: [LeadField; 5] = [
        Self::Source,
        Self::Associate,
        Self::Center,
        Self::Stage,
        Self::Status,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Name => "name",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Source => "source",
            Self::Associate => "associate",
            Self::Center => "center",
            Self::Stage => "stage",
            Self::Status => "status",
            Self::CreatedAt => "createdAt",
            Self::Remarks => "remarks",
            Self::FollowUp1Date => "followUp1Date",
            Self::FollowUp1Comment => "followUp1Comment",
            Self::FollowUp2Date => "followUp2Date",
            Self::FollowUp2Comment => "followUp2Comment",
            Self::FollowUp3Date => "followUp3Date",
            Self::FollowUp3Comment => "followUp3Comment",
            Self::FollowUp4Date => "followUp4Date",
            Self::FollowUp4Comment => "followUp4Comment",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Id => "ID",
            Self::Name => "Name",
            Self::Email => "Email",
            Self::Phone => "Phone",
            Self::Source => "Source",
            Self::Associate => "Associate",
            Self::Center => "Center",
            Self::Stage => "Stage",
            Self::Status => "Status",
            Self::CreatedAt => "Created At",
            Self::Remarks => "Remarks",
            Self::FollowUp1Date => "Follow Up 1 Date",
            Self::FollowUp1Comment => "Follow Up 1 Comment",
            Self::FollowUp2Date => "Follow Up 2 Date",
            Self::FollowUp2Comment => "Follow Up 2 Comment",
            Self::FollowUp3Date => "Follow Up 3 Date",
            Self::FollowUp3Comment => "Follow Up 3 Comment",
            Self::FollowUp4Date => "Follow Up 4 Date",
            Self::FollowUp4Comment => "Follow Up 4 Comment",
        }
    }

    pub fn kind(self) -> FieldKind {
        match self {
            Self::CreatedAt
            | Self::FollowUp1Date
            | Self::FollowUp2Date
            | Self::FollowUp3Date
            | Self::FollowUp4Date => FieldKind::Timestamp,
            _ => FieldKind::Text,
        }
    }

    /// Case-insensitive lookup by wire key.
    pub fn from_key(key: &str) -> Option<Self> {
        let key = key.trim();
        Self::ALL
            .into_iter()
            .find(|field| field.key().eq_ignore_ascii_case(key))
    }
}

/// One follow-up slot, as `(date, comment)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FollowUp {
    pub date: String,
    pub comment: String,
}

/// One sales prospect. Every canonical field is always present; columns the
/// sheet carries beyond the canonical set ride along in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Lead {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub source: String,
    pub associate: String,
    pub center: String,
    pub stage: String,
    pub status: String,
    pub created_at: String,
    pub remarks: String,
    #[serde(rename = "followUp1Date")]
    pub follow_up1_date: String,
    #[serde(rename = "followUp1Comment")]
    pub follow_up1_comment: String,
    #[serde(rename = "followUp2Date")]
    pub follow_up2_date: String,
    #[serde(rename = "followUp2Comment")]
    pub follow_up2_comment: String,
    #[serde(rename = "followUp3Date")]
    pub follow_up3_date: String,
    #[serde(rename = "followUp3Comment")]
    pub follow_up3_comment: String,
    #[serde(rename = "followUp4Date")]
    pub follow_up4_date: String,
    #[serde(rename = "followUp4Comment")]
    pub follow_up4_comment: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl Lead {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with(mut self, field: LeadField, value: impl Into<String>) -> Self {
        self.set(field, value);
        self
    }

    pub fn get(&self, field: LeadField) -> &str {
        match field {
            LeadField::Id => &self.id,
            LeadField::Name => &self.name,
            LeadField::Email => &self.email,
            LeadField::Phone => &self.phone,
            LeadField::Source => &self.source,
            LeadField::Associate => &self.associate,
            LeadField::Center => &self.center,
            LeadField::Stage => &self.stage,
            LeadField::Status => &self.status,
            LeadField::CreatedAt => &self.created_at,
            LeadField::Remarks => &self.remarks,
            LeadField::FollowUp1Date => &self.follow_up1_date,
            LeadField::FollowUp1Comment => &self.follow_up1_comment,
            LeadField::FollowUp2Date => &self.follow_up2_date,
            LeadField::FollowUp2Comment => &self.follow_up2_comment,
            LeadField::FollowUp3Date => &self.follow_up3_date,
            LeadField::FollowUp3Comment => &self.follow_up3_comment,
            LeadField::FollowUp4Date => &self.follow_up4_date,
            LeadField::FollowUp4Comment => &self.follow_up4_comment,
        }
    }

    pub fn set(&mut self, field: LeadField, value: impl Into<String>) {
        let target = match field {
            LeadField::Id => &mut self.id,
            LeadField::Name => &mut self.name,
            LeadField::Email => &mut self.email,
            LeadField::Phone => &mut self.phone,
            LeadField::Source => &mut self.source,
            LeadField::Associate => &mut self.associate,
            LeadField::Center => &mut self.center,
            LeadField::Stage => &mut self.stage,
            LeadField::Status => &mut self.status,
            LeadField::CreatedAt => &mut self.created_at,
            LeadField::Remarks => &mut self.remarks,
            LeadField::FollowUp1Date => &mut self.follow_up1_date,
            LeadField::FollowUp1Comment => &mut self.follow_up1_comment,
            LeadField::FollowUp2Date => &mut self.follow_up2_date,
            LeadField::FollowUp2Comment => &mut self.follow_up2_comment,
            LeadField::FollowUp3Date => &mut self.follow_up3_date,
            LeadField::FollowUp3Comment => &mut self.follow_up3_comment,
            LeadField::FollowUp4Date => &mut self.follow_up4_date,
            LeadField::FollowUp4Comment => &mut self.follow_up4_comment,
        };
        *target = value.into();
    }

    pub fn follow_ups(&self) -> [FollowUp; FOLLOW_UP_SLOTS] {
        let slot = |date: &str, comment: &str| FollowUp {
            date: date.to_string(),
            comment: comment.to_string(),
        };
        [
            slot(&self.follow_up1_date, &self.follow_up1_comment),
            slot(&self.follow_up2_date, &self.follow_up2_comment),
            slot(&self.follow_up3_date, &self.follow_up3_comment),
            slot(&self.follow_up4_date, &self.follow_up4_comment),
        ]
    }

    /// Looks up a canonical field by key, falling back to extra columns.
    pub fn value_of(&self, key: &str) -> Option<&str> {
        match LeadField::from_key(key) {
            Some(field) => Some(self.get(field)),
            None => self.extra.get(key).map(String::as_str),
        }
    }

    pub fn set_value(&mut self, key: &str, value: impl Into<String>) {
        match LeadField::from_key(key) {
            Some(field) => self.set(field, value),
            None => {
                self.extra.insert(key.trim().to_string(), value.into());
            }
        }
    }

    /// Every field value on the record, canonical first, then extras.
    pub fn values(&self) -> impl Iterator<Item = &str> + '_ {
        LeadField::ALL
            .into_iter()
            .map(|field| self.get(field))
            .chain(self.extra.values().map(String::as_str))
    }

    pub fn created_timestamp(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.created_at)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn is_open(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map(|start| date >= start).unwrap_or(true)
            && self.end.map(|end| date <= end).unwrap_or(true)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterCriteria {
    pub search: String,
    pub selections: BTreeMap<LeadField, BTreeSet<String>>,
    pub date_range: DateRange,
}

impl FilterCriteria {
    pub fn is_empty(&self) -> bool {
        self.search.trim().is_empty()
            && self.selections.values().all(BTreeSet::is_empty)
            && self.date_range.is_open()
    }

    pub fn select(mut self, field: LeadField, values: &[&str]) -> Self {
        let entry = self.selections.entry(field).or_default();
        entry.extend(values.iter().map(|value| value.to_string()));
        self
    }

    /// Adds the value to the field's selection, or removes it if present.
    /// Returns whether the value is selected afterwards.
    pub fn toggle_selection(&mut self, field: LeadField, value: &str) -> bool {
        let entry = self.selections.entry(field).or_default();
        let selected = if entry.remove(value) {
            false
        } else {
            entry.insert(value.to_string());
            true
        };
        if entry.is_empty() {
            self.selections.remove(&field);
        }
        selected
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortConfig {
    pub field: LeadField,
    pub direction: SortDirection,
}

impl SortConfig {
    pub fn asc(field: LeadField) -> Self {
        Self {
            field,
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: LeadField) -> Self {
        Self {
            field,
            direction: SortDirection::Desc,
        }
    }

    /// Header-click behavior: a new field starts ascending, the current field
    /// flips direction.
    pub fn toggle(current: Option<SortConfig>, field: LeadField) -> SortConfig {
        match current {
            Some(config) if config.field == field => match config.direction {
                SortDirection::Asc => Self::desc(field),
                SortDirection::Desc => Self::asc(field),
            },
            _ => Self::asc(field),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PivotField {
    Field(LeadField),
    CreatedYear,
    CreatedMonth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AggregationMode {
    Count,
    UniqueCount,
    Sum,
    Average,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PivotConfig {
    pub rows: PivotField,
    pub columns: PivotField,
    pub aggregation: AggregationMode,
    pub value_field: Option<LeadField>,
}

impl Default for PivotConfig {
    fn default() -> Self {
        Self {
            rows: PivotField::Field(LeadField::Status),
            columns: PivotField::Field(LeadField::Source),
            aggregation: AggregationMode::Count,
            value_field: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RowHeight {
    Compact,
    Normal,
    Comfortable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViewMode {
    Table,
    Cards,
    Kanban,
    Pivot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Theme {
    Light,
    Dark,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewSettings {
    pub row_height: RowHeight,
    pub visible_columns: Vec<LeadField>,
    pub view_mode: ViewMode,
    pub kanban_group_by: LeadField,
    pub pivot: PivotConfig,
    pub theme: Theme,
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self {
            row_height: RowHeight::Normal,
            visible_columns: vec![
                LeadField::Name,
                LeadField::Email,
                LeadField::Phone,
                LeadField::Source,
                LeadField::Associate,
                LeadField::Center,
                LeadField::Stage,
                LeadField::Status,
                LeadField::CreatedAt,
            ],
            view_mode: ViewMode::Table,
            kanban_group_by: LeadField::Stage,
            pivot: PivotConfig::default(),
            theme: Theme::System,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageView {
    pub items: Vec<Lead>,
    pub page: usize,
    pub page_size: usize,
    pub total_items: usize,
    pub total_pages: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadSummary {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_source: BTreeMap<String, usize>,
    pub by_associate: BTreeMap<String, usize>,
    pub converted: usize,
    pub unique_emails: usize,
    pub conversion_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KanbanColumn {
    pub key: String,
    pub leads: Vec<Lead>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NoticeLevel {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    pub lead_count: usize,
    pub filtered_count: usize,
    pub page: usize,
    pub page_size: usize,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}
