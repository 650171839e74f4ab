use actix_web::HttpResponse;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

pub const DEFAULT_PER_PAGE: u32 = 20;
pub const MAX_PER_PAGE: u32 = 100;

/// Standard response envelope: `{success, message, data, pagination}`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Clone, Copy, Serialize, ToSchema, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
    pub total_pages: u32,
}

impl Pagination {
    pub fn new(page: PageParams, total: i64) -> Self {
        let total_pages = if total <= 0 {
            0
        } else {
            ((total as u64).div_ceil(page.per_page as u64)) as u32
        };

        Self {
            page: page.page,
            per_page: page.per_page,
            total,
            total_pages,
        }
    }
}

/// Raw `page` / `per_page` query parameters, flattened into list filters.
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct PageQuery {
    /// Page number, starting at 1
    pub page: Option<u32>,
    /// Items per page (1-100)
    pub per_page: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageParams {
    pub page: u32,
    pub per_page: u32,
}

impl PageParams {
    pub fn resolve(page: Option<u32>, per_page: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE),
        }
    }

    pub fn limit(&self) -> u64 {
        self.per_page as u64
    }

    pub fn offset(&self) -> u64 {
        (self.page as u64 - 1) * self.per_page as u64
    }
}

impl From<&PageQuery> for PageParams {
    fn from(q: &PageQuery) -> Self {
        PageParams::resolve(q.page, q.per_page)
    }
}

pub fn ok<T: Serialize>(message: &str, data: T) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse {
        success: true,
        message: message.to_string(),
        data: Some(data),
        pagination: None,
    })
}

pub fn created<T: Serialize>(message: &str, data: T) -> HttpResponse {
    HttpResponse::Created().json(ApiResponse {
        success: true,
        message: message.to_string(),
        data: Some(data),
        pagination: None,
    })
}

pub fn message(message: &str) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse::<()> {
        success: true,
        message: message.to_string(),
        data: None,
        pagination: None,
    })
}

pub fn paginated<T: Serialize>(
    message: &str,
    data: Vec<T>,
    page: PageParams,
    total: i64,
) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse {
        success: true,
        message: message.to_string(),
        data: Some(data),
        pagination: Some(Pagination::new(page, total)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_params_defaults_and_clamps() {
        assert_eq!(
            PageParams::resolve(None, None),
            PageParams { page: 1, per_page: 20 }
        );
        assert_eq!(
            PageParams::resolve(Some(0), Some(0)),
            PageParams { page: 1, per_page: 1 }
        );
        assert_eq!(PageParams::resolve(Some(3), Some(500)).per_page, 100);
    }

    #[test]
    fn offset_is_zero_based() {
        let p = PageParams::resolve(Some(3), Some(25));
        assert_eq!(p.offset(), 50);
        assert_eq!(p.limit(), 25);
    }

    #[test]
    fn total_pages_rounds_up() {
        let p = PageParams::resolve(Some(1), Some(10));
        assert_eq!(Pagination::new(p, 0).total_pages, 0);
        assert_eq!(Pagination::new(p, 10).total_pages, 1);
        assert_eq!(Pagination::new(p, 11).total_pages, 2);
    }
}
