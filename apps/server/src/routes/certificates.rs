use actix_web::{HttpResponse, get, web};
use probewatch::database::{
    CertificateFilter, CertificateQuery, CertificateRecord, ExpiryStatus, QueryError, SortDirection,
};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::error::ApiError;

/// `?filter=all|valid|invalid|expiring|failed&days=N&sort=..&direction=asc|desc&limit=N`
#[derive(Debug, Default, Deserialize)]
pub struct CertificateParams {
    filter: Option<String>,
    days: Option<i64>,
    sort: Option<String>,
    direction: Option<String>,
    limit: Option<u32>,
}

impl CertificateParams {
    fn into_query(self) -> Result<CertificateQuery, QueryError> {
        let mut query = CertificateQuery::default();
        if let Some(filter) = self.filter.as_deref() {
            query.filter = CertificateFilter::parse(filter, self.days)?;
        }
        if let Some(sort) = self.sort.as_deref() {
            query.sort = sort.parse()?;
        }
        if let Some(direction) = self.direction.as_deref() {
            query.direction = direction.parse::<SortDirection>()?;
        }
        if let Some(limit) = self.limit {
            query.limit = limit;
        }
        Ok(query)
    }
}

#[derive(Serialize)]
struct CertificateView {
    #[serde(flatten)]
    record: CertificateRecord,
    expiry_status: ExpiryStatus,
}

#[get("/certificates")]
pub async fn list_certificates(
    state: web::Data<AppState>,
    params: web::Query<CertificateParams>,
) -> Result<HttpResponse, ApiError> {
    let query = params.into_inner().into_query()?;
    let records = state.store.list_certificates(&query).await.map_err(ApiError::Store)?;

    let now = state.clock.now();
    let views: Vec<_> = records
        .into_iter()
        .map(|record| CertificateView { expiry_status: record.expiry_status(now), record })
        .collect();

    Ok(HttpResponse::Ok().json(views))
}
