use serde::{Deserialize, Serialize};
use time::{format_description::well_known::Rfc3339, macros::format_description, Date, OffsetDateTime, Time};

use crate::{
    auth::validation::is_valid_email,
    db::{Contact, ContactFields, ContactQuery, SortKey, SortOrder},
};

pub const DEFAULT_TIMEZONE: &str = "UTC";
pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

/// Contact as submitted by a client, before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct CandidateContact {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn non_empty(v: &Option<String>) -> Option<String> {
    v.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl CandidateContact {
    /// Trimmed, checked column values. Empty optional fields become null and
    /// an empty timezone falls back to UTC.
    pub fn validate(&self) -> Result<ContactFields, Vec<String>> {
        let name = self.name.trim();
        let email = self.email.trim();
        let mut problems = Vec::new();
        if name.is_empty() {
            problems.push("name is required".to_string());
        }
        if !is_valid_email(email) {
            problems.push("email must be a valid email address".to_string());
        }
        if !problems.is_empty() {
            return Err(problems);
        }
        let timezone = match self.timezone.trim() {
            "" => default_timezone(),
            tz => tz.to_string(),
        };
        Ok(ContactFields {
            name: name.to_string(),
            email: email.to_string(),
            phone: non_empty(&self.phone),
            address: non_empty(&self.address),
            timezone,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub contacts: Vec<CandidateContact>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    pub message: &'static str,
    pub created_contacts: Vec<Contact>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub name: Option<String>,
    pub email: Option<String>,
    pub timezone: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

/// Page number and size after defaults are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub page: i64,
    pub page_size: i64,
}

impl ListQuery {
    pub fn to_query(&self) -> Result<(ContactQuery, PageWindow), Vec<String>> {
        let mut problems = Vec::new();

        let sort = match self.sort_by.as_deref() {
            None | Some("createdAt") => SortKey::CreatedAt,
            Some("name") => SortKey::Name,
            Some("email") => SortKey::Email,
            Some("timezone") => SortKey::Timezone,
            Some(other) => {
                problems.push(format!(
                    "sortBy must be one of name, email, timezone, createdAt (got {other})"
                ));
                SortKey::CreatedAt
            }
        };
        let order = match self.sort_order.as_deref() {
            None | Some("desc") => SortOrder::Desc,
            Some("asc") => SortOrder::Asc,
            Some(other) => {
                problems.push(format!("sortOrder must be asc or desc (got {other})"));
                SortOrder::Desc
            }
        };
        let page = self.page.unwrap_or(1);
        if page < 1 {
            problems.push("page must be at least 1".into());
        }
        let page_size = self.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
            problems.push(format!("pageSize must be between 1 and {MAX_PAGE_SIZE}"));
        }
        if !problems.is_empty() {
            return Err(problems);
        }
        let Some(offset) = (page - 1).checked_mul(page_size) else {
            return Err(vec!["page is out of range".into()]);
        };

        let query = ContactQuery {
            name: non_empty(&self.name),
            email: non_empty(&self.email),
            timezone: non_empty(&self.timezone),
            sort,
            order,
            limit: Some(page_size),
            offset,
            ..Default::default()
        };
        Ok((query, PageWindow { page, page_size }))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: i64,
    pub page_size: i64,
    pub total: i64,
    pub total_pages: i64,
}

impl Pagination {
    pub fn new(window: PageWindow, total: i64) -> Self {
        Self {
            page: window.page,
            page_size: window.page_size,
            total,
            total_pages: (total + window.page_size - 1) / window.page_size,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub contacts: Vec<Contact>,
    pub pagination: Pagination,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRangeQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum Bound {
    Start,
    End,
}

/// RFC 3339 timestamp, or a bare `YYYY-MM-DD` covering that whole UTC day.
fn parse_bound(raw: &str, bound: Bound) -> Option<OffsetDateTime> {
    let raw = raw.trim();
    if let Ok(ts) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(ts);
    }
    let date = Date::parse(raw, format_description!("[year]-[month]-[day]")).ok()?;
    let time = match bound {
        Bound::Start => Time::MIDNIGHT,
        Bound::End => Time::from_hms_nano(23, 59, 59, 999_999_999).ok()?,
    };
    Some(date.with_time(time).assume_utc())
}

impl DateRangeQuery {
    pub fn to_query(&self) -> Result<ContactQuery, Vec<String>> {
        let mut problems = Vec::new();
        let mut bound = |field: &str, value: &Option<String>, which: Bound| match value {
            None => {
                problems.push(format!("{field} is required"));
                None
            }
            Some(raw) => {
                let parsed = parse_bound(raw, which);
                if parsed.is_none() {
                    problems.push(format!("{field} must be a date or RFC 3339 timestamp"));
                }
                parsed
            }
        };
        let start = bound("startDate", &self.start_date, Bound::Start);
        let end = bound("endDate", &self.end_date, Bound::End);
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                problems.push("startDate must not be after endDate".into());
            }
        }
        if !problems.is_empty() {
            return Err(problems);
        }
        Ok(ContactQuery {
            created_from: start,
            created_to: end,
            sort: SortKey::CreatedAt,
            order: SortOrder::Asc,
            limit: None,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    fn candidate(name: &str, email: &str) -> CandidateContact {
        CandidateContact {
            name: name.into(),
            email: email.into(),
            phone: None,
            address: None,
            timezone: DEFAULT_TIMEZONE.into(),
        }
    }

    #[test]
    fn timezone_defaults_to_utc() {
        let c: CandidateContact =
            serde_json::from_str(r#"{"name":"A","email":"a@x.com"}"#).unwrap();
        assert_eq!(c.timezone, "UTC");
        let fields = c.validate().unwrap();
        assert_eq!(fields.timezone, "UTC");
        assert!(fields.phone.is_none());
    }

    #[test]
    fn validation_trims_and_rejects() {
        let mut c = candidate("  Ann ", " ann@x.com ");
        c.phone = Some("   ".into());
        c.timezone = "".into();
        let fields = c.validate().unwrap();
        assert_eq!(fields.name, "Ann");
        assert_eq!(fields.email, "ann@x.com");
        assert_eq!(fields.phone, None);
        assert_eq!(fields.timezone, "UTC");

        let problems = candidate(" ", "nope").validate().unwrap_err();
        assert_eq!(problems.len(), 2);
    }

    #[test]
    fn list_query_defaults() {
        let (q, window) = ListQuery::default().to_query().unwrap();
        assert_eq!(window, PageWindow { page: 1, page_size: 10 });
        assert_eq!(q.sort, SortKey::CreatedAt);
        assert_eq!(q.order, SortOrder::Desc);
        assert_eq!(q.limit, Some(10));
        assert_eq!(q.offset, 0);
    }

    #[test]
    fn list_query_rejects_bad_values() {
        let bad = ListQuery {
            sort_by: Some("password".into()),
            sort_order: Some("sideways".into()),
            page: Some(0),
            page_size: Some(1000),
            ..Default::default()
        };
        assert_eq!(bad.to_query().unwrap_err().len(), 4);
    }

    #[test]
    fn list_query_offsets_by_page() {
        let q = ListQuery {
            sort_by: Some("name".into()),
            sort_order: Some("asc".into()),
            page: Some(3),
            page_size: Some(25),
            ..Default::default()
        };
        let (q, _) = q.to_query().unwrap();
        assert_eq!(q.sort, SortKey::Name);
        assert_eq!(q.order, SortOrder::Asc);
        assert_eq!(q.offset, 50);
    }

    #[test]
    fn huge_page_is_out_of_range() {
        let q = ListQuery {
            page: Some(i64::MAX),
            page_size: Some(MAX_PAGE_SIZE),
            ..Default::default()
        };
        assert_eq!(q.to_query().unwrap_err(), vec!["page is out of range".to_string()]);

        let q = ListQuery {
            page: Some(i64::MAX),
            page_size: Some(1),
            ..Default::default()
        };
        assert_eq!(q.to_query().unwrap().0.offset, i64::MAX - 1);
    }

    #[test]
    fn total_pages_rounds_up() {
        let w = PageWindow { page: 1, page_size: 10 };
        assert_eq!(Pagination::new(w, 0).total_pages, 0);
        assert_eq!(Pagination::new(w, 10).total_pages, 1);
        assert_eq!(Pagination::new(w, 11).total_pages, 2);
    }

    #[test]
    fn date_range_accepts_days_and_timestamps() {
        let q = DateRangeQuery {
            start_date: Some("2024-01-01".into()),
            end_date: Some("2024-01-31T12:00:00Z".into()),
        }
        .to_query()
        .unwrap();
        assert_eq!(q.created_from, Some(datetime!(2024-01-01 0:00 UTC)));
        assert_eq!(q.created_to, Some(datetime!(2024-01-31 12:00 UTC)));

        let q = DateRangeQuery {
            start_date: Some("2024-01-01".into()),
            end_date: Some("2024-01-01".into()),
        }
        .to_query()
        .unwrap();
        assert!(q.created_to.unwrap() > datetime!(2024-01-01 23:59:59 UTC));
    }

    #[test]
    fn date_range_rejects_inverted_or_missing_bounds() {
        let inverted = DateRangeQuery {
            start_date: Some("2024-02-01".into()),
            end_date: Some("2024-01-01".into()),
        };
        assert_eq!(inverted.to_query().unwrap_err().len(), 1);

        let missing = DateRangeQuery {
            start_date: None,
            end_date: Some("yesterday".into()),
        };
        assert_eq!(missing.to_query().unwrap_err().len(), 2);
    }
}
