//! Pagination query parameters shared by list endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Pagination {
    /// Number of records to skip
    #[serde(default)]
    pub skip: i64,
    /// Maximum number of records to return
    #[serde(default = "default_limit")]
    pub limit: i64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            skip: 0,
            limit: default_limit(),
        }
    }
}
