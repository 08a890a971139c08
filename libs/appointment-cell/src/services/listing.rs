// libs/appointment-cell/src/services/listing.rs
use serde::Serialize;
use tracing::debug;

use shared_database::{DocumentStore, Filter, Pipeline, SortOrder};

use crate::models::{collections, AppointmentError, AppointmentListQuery, AppointmentStatus};
use crate::services::access::AccessScope;
use crate::services::formatting::{format_document, with_relations, AppointmentView};

const SORTABLE_FIELDS: [&str; 6] = ["date", "startTime", "createdAt", "updatedAt", "status", "type"];

const SEARCH_FIELDS: [&str; 8] = [
    "reason",
    "notes",
    "status",
    "type",
    "patientUser.firstName",
    "patientUser.lastName",
    "doctorUser.firstName",
    "doctorUser.lastName",
];

#[derive(Debug, Clone)]
pub struct ListOptions {
    pub page: u64,
    pub limit: u64,
    pub status: Option<AppointmentStatus>,
    pub doctor_id: Option<uuid::Uuid>,
    pub patient_id: Option<uuid::Uuid>,
    pub clinic_id: Option<uuid::Uuid>,
    pub start_date: Option<chrono::NaiveDate>,
    pub end_date: Option<chrono::NaiveDate>,
    pub search: Option<String>,
    pub sort_by: String,
    pub sort_order: SortOrder,
    pub scope: AccessScope,
}

impl ListOptions {
    pub fn from_query(
        query: AppointmentListQuery,
        scope: AccessScope,
        default_limit: u64,
        max_limit: u64,
    ) -> Result<Self, AppointmentError> {
        if let (Some(start), Some(end)) = (query.start_date, query.end_date) {
            if start > end {
                return Err(AppointmentError::ValidationError(
                    "startDate must not be after endDate".to_string(),
                ));
            }
        }

        let sort_by = match query.sort_by {
            Some(field) if SORTABLE_FIELDS.contains(&field.as_str()) => field,
            Some(field) => {
                return Err(AppointmentError::ValidationError(format!(
                    "Cannot sort by '{}'",
                    field
                )));
            }
            None => "date".to_string(),
        };

        let sort_order = match query.sort_order.as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("desc") | Some("descending") | Some("-1") => SortOrder::Descending,
            Some("asc") | Some("ascending") | Some("1") => SortOrder::Ascending,
            Some(other) => {
                return Err(AppointmentError::ValidationError(format!(
                    "Unknown sort order '{}'",
                    other
                )));
            }
        };

        Ok(Self {
            page: query.page.unwrap_or(1).max(1),
            limit: query.limit.unwrap_or(default_limit).clamp(1, max_limit.max(1)),
            status: query.status,
            doctor_id: query.doctor_id,
            patient_id: query.patient_id,
            clinic_id: query.clinic_id,
            start_date: query.start_date,
            end_date: query.end_date,
            search: query
                .search
                .map(|term| term.trim().to_string())
                .filter(|term| !term.is_empty()),
            sort_by,
            sort_order,
            scope,
        })
    }

    /// Filters on the appointment's own fields.
    pub fn match_filter(&self) -> Filter {
        let mut filters = Vec::new();

        if let Some(scope) = self.scope.filter() {
            filters.push(scope);
        }
        if let Some(status) = self.status {
            filters.push(Filter::eq("status", status.as_str()));
        }
        if let Some(doctor_id) = self.doctor_id {
            filters.push(Filter::eq("doctorId", doctor_id.to_string()));
        }
        if let Some(patient_id) = self.patient_id {
            filters.push(Filter::eq("patientId", patient_id.to_string()));
        }
        if let Some(clinic_id) = self.clinic_id {
            filters.push(Filter::eq("clinicId", clinic_id.to_string()));
        }
        if let Some(start) = self.start_date {
            filters.push(Filter::gte("date", start.to_string()));
        }
        if let Some(end) = self.end_date {
            filters.push(Filter::lte("date", end.to_string()));
        }

        Filter::And(filters)
    }

    /// Free-text match over the appointment and its joined people. The term
    /// is matched literally.
    pub fn search_filter(&self) -> Option<Filter> {
        self.search.as_deref().map(|term| {
            Filter::Or(
                SEARCH_FIELDS
                    .iter()
                    .filter_map(|field| Filter::contains_ignore_case(*field, term))
                    .collect(),
            )
        })
    }

    pub fn skip(&self) -> u64 {
        (self.page - 1).saturating_mul(self.limit)
    }

    pub fn data_pipeline(&self) -> Pipeline {
        let mut pipeline = with_relations(Pipeline::new().match_filter(self.match_filter()));
        if let Some(search) = self.search_filter() {
            pipeline = pipeline.match_filter(search);
        }

        let mut keys = vec![(self.sort_by.clone(), self.sort_order)];
        if self.sort_by == "date" {
            keys.push(("startTime".to_string(), self.sort_order));
        }
        keys.push(("id".to_string(), SortOrder::Ascending));

        pipeline.sort(keys).skip(self.skip()).limit(self.limit)
    }

    pub fn count_pipeline(&self) -> Pipeline {
        let mut pipeline = Pipeline::new().match_filter(self.match_filter());
        if let Some(search) = self.search_filter() {
            pipeline = with_relations(pipeline).match_filter(search);
        }
        pipeline.count("total")
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentPage {
    pub appointments: Vec<AppointmentView>,
    pub total: u64,
    pub total_pages: u64,
    pub current_page: u64,
    pub limit: u64,
}

pub fn total_pages(total: u64, limit: u64) -> u64 {
    if limit == 0 {
        0
    } else {
        total.div_ceil(limit)
    }
}

pub async fn list_appointments(
    store: &DocumentStore,
    options: &ListOptions,
) -> Result<AppointmentPage, AppointmentError> {
    let documents = store
        .aggregate(collections::APPOINTMENTS, &options.data_pipeline())
        .await?;
    let counted = store
        .aggregate(collections::APPOINTMENTS, &options.count_pipeline())
        .await?;

    let total = counted
        .first()
        .and_then(|doc| doc.get("total"))
        .and_then(|total| total.as_u64())
        .unwrap_or(0);

    debug!(
        "Listed {} of {} appointments (page {}, limit {})",
        documents.len(),
        total,
        options.page,
        options.limit
    );

    Ok(AppointmentPage {
        appointments: documents.into_iter().map(format_document).collect(),
        total,
        total_pages: total_pages(total, options.limit),
        current_page: options.page,
        limit: options.limit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn options(query: AppointmentListQuery) -> ListOptions {
        ListOptions::from_query(query, AccessScope::All, 10, 100).unwrap()
    }

    #[test]
    fn test_total_pages() {
        assert_eq!(total_pages(0, 10), 0);
        assert_eq!(total_pages(10, 10), 1);
        assert_eq!(total_pages(11, 10), 2);
        assert_eq!(total_pages(25, 7), 4);
    }

    #[test]
    fn test_defaults_and_clamping() {
        let defaults = options(AppointmentListQuery::default());
        assert_eq!(defaults.page, 1);
        assert_eq!(defaults.limit, 10);
        assert_eq!(defaults.sort_by, "date");
        assert_eq!(defaults.sort_order, SortOrder::Descending);

        let clamped = options(AppointmentListQuery {
            page: Some(0),
            limit: Some(1000),
            search: Some("   ".to_string()),
            ..Default::default()
        });
        assert_eq!(clamped.page, 1);
        assert_eq!(clamped.limit, 100);
        assert!(clamped.search.is_none());
    }

    #[test]
    fn test_rejects_bad_sort_and_range() {
        assert_matches!(
            ListOptions::from_query(
                AppointmentListQuery {
                    sort_by: Some("password".to_string()),
                    ..Default::default()
                },
                AccessScope::All,
                10,
                100
            ),
            Err(AppointmentError::ValidationError(_))
        );

        assert_matches!(
            ListOptions::from_query(
                AppointmentListQuery {
                    start_date: chrono::NaiveDate::from_ymd_opt(2026, 12, 1),
                    end_date: chrono::NaiveDate::from_ymd_opt(2026, 11, 1),
                    ..Default::default()
                },
                AccessScope::All,
                10,
                100
            ),
            Err(AppointmentError::ValidationError(_))
        );
    }

    #[test]
    fn test_skip_follows_page() {
        let third = options(AppointmentListQuery {
            page: Some(3),
            limit: Some(5),
            ..Default::default()
        });
        assert_eq!(third.skip(), 10);
    }
}
