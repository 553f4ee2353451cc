use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

pub type Id = i64;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Town {
    pub id: Id,
    pub name: String,
    pub slug: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct NewTown {
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    /// Derived from `name` when omitted.
    #[validate(length(min = 1, max = 120))]
    pub slug: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, Validate)]
pub struct UpdateTown {
    #[validate(length(min = 1, max = 120))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 120))]
    pub slug: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Location {
    pub id: Id,
    pub town_id: Id,
    pub name: String,
    pub slug: String,
    pub address: String,
    pub view_count: i64,
    pub is_active: bool,
    pub business_category: Option<String>,
    pub business_tags: Vec<String>,
    pub profile_completed: bool,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl Location {
    /// A business profile counts as complete once it is categorised and tagged.
    pub fn profile_is_complete(category: Option<&str>, tags: &[String]) -> bool {
        category.map(|c| !c.trim().is_empty()).unwrap_or(false) && !tags.is_empty()
    }

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Some((lat, lng)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct NewLocation {
    pub town_id: Id,
    #[validate(length(min = 1, max = 160))]
    pub name: String,
    #[validate(length(min = 1, max = 160))]
    pub slug: Option<String>,
    #[serde(default)]
    #[validate(length(max = 300))]
    pub address: String,
    pub business_category: Option<String>,
    #[serde(default)]
    pub business_tags: Vec<String>,
    #[validate(range(min = -90.0, max = 90.0))]
    pub lat: Option<f64>,
    #[validate(range(min = -180.0, max = 180.0))]
    pub lng: Option<f64>,
}

/// Partial update; `None` leaves a field untouched. Nullable columns use a
/// nested option so clients can clear them with an explicit `null`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, Validate)]
pub struct UpdateLocation {
    pub town_id: Option<Id>,
    #[validate(length(min = 1, max = 160))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 160))]
    pub slug: Option<String>,
    #[validate(length(max = 300))]
    pub address: Option<String>,
    pub is_active: Option<bool>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub business_category: Option<Option<String>>,
    pub business_tags: Option<Vec<String>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<f64>)]
    pub lat: Option<Option<f64>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<f64>)]
    pub lng: Option<Option<f64>>,
}

fn double_option<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

/// Normalise free-form tags: trimmed, lowercase, deduplicated, order kept.
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for t in tags {
        let t = t.trim().to_lowercase();
        if !t.is_empty() && !out.contains(&t) {
            out.push(t);
        }
    }
    out
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Photo {
    pub id: Id,
    pub location_id: Id,
    pub storage_path: String,
    pub is_current: bool,
    pub is_flagged: bool,
    pub flag_count: i32,
    pub created_at: DateTime<Utc>,
}

impl Photo {
    pub fn is_public(&self) -> bool {
        self.is_current && !self.is_flagged
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Flag {
    pub id: Id,
    pub photo_id: Id,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Reverted,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Approved => "approved",
            ReviewStatus::Reverted => "reverted",
        }
    }
}

impl std::str::FromStr for ReviewStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(ReviewStatus::Pending),
            "approved" => Ok(ReviewStatus::Approved),
            "reverted" => Ok(ReviewStatus::Reverted),
            other => Err(format!("unknown review status '{other}'")),
        }
    }
}

impl TryFrom<String> for ReviewStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct AutoFlagEvent {
    pub id: Id,
    pub photo_id: Id,
    pub location_id: Id,
    pub flag_count: i32,
    #[sqlx(try_from = "String")]
    pub status: ReviewStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Result of a single public flag.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FlagOutcome {
    pub photo_id: Id,
    pub flag_count: i32,
    /// True only for the flag that crossed the threshold.
    pub auto_flagged: bool,
}

/// Everything the public board page needs in one response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BoardView {
    pub town: Town,
    pub location: Location,
    pub photo: Option<Photo>,
    pub photo_url: Option<String>,
}
