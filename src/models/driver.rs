use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub id: Uuid,
    pub name: String,
    /// Last reported position; drivers without a fix still get a workboard,
    /// just without distance ordering.
    pub location: Option<GeoPoint>,
    pub updated_at: DateTime<Utc>,
}
