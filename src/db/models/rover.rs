use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rover {
    pub rover_id: i64,
    pub initial_id: i64,
    pub rover_status: i64,
    pub user_id: i64,
    pub nickname: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewRover {
    pub initial_id: i64,
    pub rover_status: i64,
    pub user_id: i64,
    /// Defaults to `rover-{rover_id}` once the id is assigned.
    #[serde(default)]
    pub nickname: Option<String>,
}
