use actix_web::{HttpResponse, get, web};
use probewatch::database::{DnsFilter, DnsQuery, QueryError};
use serde::Deserialize;

use super::AppState;
use crate::error::ApiError;

/// `?filter=all|ok|failed|slow&threshold=MS&sort=..&direction=asc|desc&limit=N`
#[derive(Debug, Default, Deserialize)]
pub struct DnsParams {
    filter: Option<String>,
    threshold: Option<f64>,
    sort: Option<String>,
    direction: Option<String>,
    limit: Option<u32>,
}

impl DnsParams {
    fn into_query(self) -> Result<DnsQuery, QueryError> {
        let mut query = DnsQuery::default();
        if let Some(filter) = self.filter.as_deref() {
            query.filter = DnsFilter::parse(filter, self.threshold)?;
        }
        if let Some(sort) = self.sort.as_deref() {
            query.sort = sort.parse()?;
        }
        if let Some(direction) = self.direction.as_deref() {
            query.direction = direction.parse()?;
        }
        if let Some(limit) = self.limit {
            query.limit = limit;
        }
        Ok(query)
    }
}

#[get("/dns")]
pub async fn list_dns(state: web::Data<AppState>, params: web::Query<DnsParams>) -> Result<HttpResponse, ApiError> {
    let query = params.into_inner().into_query()?;
    let records = state.store.list_dns(&query).await.map_err(ApiError::Store)?;
    Ok(HttpResponse::Ok().json(records))
}
