//! Hero banner domain types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use meridian_core::HeroBannerId;

/// A homepage hero banner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeroBanner {
    pub id: HeroBannerId,
    pub title: String,
    pub subtitle: Option<String>,
    pub image_url: String,
    pub link_url: Option<String>,
    pub cta_label: Option<String>,
    pub position: i32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Admin create/update payload for a hero banner.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct HeroBannerInput {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[serde(default)]
    #[validate(length(max = 500))]
    pub subtitle: Option<String>,
    #[validate(url)]
    pub image_url: String,
    #[serde(default)]
    #[validate(length(max = 500))]
    pub link_url: Option<String>,
    #[serde(default)]
    #[validate(length(max = 60))]
    pub cta_label: Option<String>,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub position: i32,
    #[serde(default = "default_active")]
    pub active: bool,
}

const fn default_active() -> bool {
    true
}
