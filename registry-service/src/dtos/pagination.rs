use registry_core::error::AppError;
use serde::Deserialize;

use crate::services::stores::Page;

pub const DEFAULT_LIMIT: usize = 10;
pub const DEFAULT_OFFSET: usize = 0;

/// Raw `?limit=&offset=` query. Kept as strings so a non-integer value is a
/// 400 with our own message rather than the extractor's rejection.
#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub limit: Option<String>,
    pub offset: Option<String>,
}

impl PageParams {
    pub fn page(&self) -> Result<Page, AppError> {
        Ok(Page {
            limit: parse_param("limit", self.limit.as_deref(), DEFAULT_LIMIT)?,
            offset: parse_param("offset", self.offset.as_deref(), DEFAULT_OFFSET)?,
        })
    }
}

fn parse_param(name: &str, raw: Option<&str>, default: usize) -> Result<usize, AppError> {
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(value) => value.parse::<usize>().map_err(|_| {
            AppError::BadRequest(anyhow::anyhow!("{} must be a non-negative integer", name))
        }),
    }
}
