use crate::config::AppConfig;
use serde::Deserialize;
use utoipa::IntoParams;

/// Page selection shared by list endpoints
#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct PaginationParams {
    /// One-based page number (default: 1)
    #[serde(default = "default_page")]
    pub page: u64,
    /// Items per page; clamped to the configured maximum
    pub per_page: Option<u64>,
}

fn default_page() -> u64 {
    1
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            page: default_page(),
            per_page: None,
        }
    }
}

impl PaginationParams {
    /// Effective `(page, per_page)` after applying configured bounds
    pub fn resolve(&self, config: &AppConfig) -> (u64, u64) {
        (self.page.max(1), config.page_size(self.per_page))
    }
}
