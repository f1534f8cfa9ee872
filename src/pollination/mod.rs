use std::{collections::BTreeSet, sync::Arc};

use chrono::{DateTime, Utc};
use log::debug;
use serde::Serialize;

use crate::{
    error::PipelineError,
    stores::{ArchiveFilter, ArchiveStore, RoverDirectory},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoverTally {
    pub rover_id: i64,
    pub rover_nickname: String,
    pub flower_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollinationSummary {
    pub net_count: u64,
    pub by_rover: Vec<RoverTally>,
}

/// Counts archived flower detections per rover over a time window.
pub struct PollinationAggregator {
    archive: Arc<dyn ArchiveStore>,
    rovers: Arc<dyn RoverDirectory>,
}

impl PollinationAggregator {
    pub fn new(archive: Arc<dyn ArchiveStore>, rovers: Arc<dyn RoverDirectory>) -> Self {
        Self { archive, rovers }
    }

    /// Both ends of the window are inclusive. Every requested rover gets an
    /// entry, in ascending id order, even when it has no records.
    pub async fn summarize(
        &self,
        rover_ids: &BTreeSet<i64>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<PollinationSummary, PipelineError> {
        if rover_ids.is_empty() {
            return Ok(PollinationSummary::default());
        }
        if start > end {
            return Err(PipelineError::InvalidInput(format!(
                "start_date {start} is after end_date {end}"
            )));
        }

        let mut by_rover = Vec::with_capacity(rover_ids.len());
        for &rover_id in rover_ids {
            let rover = self
                .rovers
                .rover(rover_id)
                .await
                .map_err(PipelineError::staging)?
                .ok_or_else(|| PipelineError::NotFound(format!("rover {rover_id} does not exist")))?;
            by_rover.push(RoverTally {
                rover_id,
                rover_nickname: rover.nickname,
                flower_count: 0,
            });
        }

        let filter = ArchiveFilter {
            rover_ids: rover_ids.iter().copied().collect(),
            created_from: Some(start),
            created_to: Some(end),
        };
        let records = self
            .archive
            .find(&filter)
            .await
            .map_err(PipelineError::archive_read)?;
        debug!(
            "pollination window matched {} archive records across {} rovers",
            records.len(),
            rover_ids.len()
        );

        for record in &records {
            // by_rover is in rover_ids order, which is ascending
            if let Ok(index) = by_rover.binary_search_by_key(&record.rover_id, |t| t.rover_id) {
                by_rover[index].flower_count += record.flower_count();
            }
        }

        let net_count = by_rover.iter().map(|t| t.flower_count).sum();
        Ok(PollinationSummary {
            net_count,
            by_rover,
        })
    }
}
