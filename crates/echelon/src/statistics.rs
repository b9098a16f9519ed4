//! Ingestion of match statistics sent by game servers.
//!
//! Per record: add the counters to the tank's totals, then add the match
//! points to the owning account. Records with nothing in them cause no
//! storage traffic at all.

use std::sync::Arc;

use echelon_protocol::MatchStatistics;
use echelon_store::{Database, Statement, StoreError, Value};

use crate::rank::match_points;

/// Outcome of one [`StatisticsRecorder::record`] batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatisticsSummary {
    pub recorded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub points_awarded: u64,
}

#[derive(Debug, thiserror::Error)]
enum RecordError {
    #[error("no statistics for tank {0}")]
    UnknownTank(String),
    #[error("no account owns tank {0}")]
    UnknownAccount(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct StatisticsRecorder {
    database: Arc<dyn Database>,
}

impl StatisticsRecorder {
    pub fn new(database: Arc<dyn Database>) -> Self {
        Self { database }
    }

    /// Records a batch. A record that fails is logged and the rest are
    /// still processed.
    pub async fn record(&self, records: &[MatchStatistics]) -> StatisticsSummary {
        let mut summary = StatisticsSummary::default();
        for record in records {
            if record.is_empty() {
                summary.skipped += 1;
                continue;
            }
            match self.record_one(record).await {
                Ok(points) => {
                    summary.recorded += 1;
                    summary.points_awarded += points;
                }
                Err(e) => {
                    tracing::warn!(tank = %record.tank_name, error = %e, "could not record statistics");
                    summary.failed += 1;
                }
            }
        }
        tracing::debug!(?summary, "statistics batch processed");
        summary
    }

    /// Returns the points awarded to the owning account.
    async fn record_one(&self, record: &MatchStatistics) -> Result<u64, RecordError> {
        let tank: Value = record.tank_name.as_str().into();

        let rows = self
            .database
            .query(Statement::GetTankStatistics, std::slice::from_ref(&tank))
            .await?;
        let totals = rows
            .first()
            .ok_or_else(|| RecordError::UnknownTank(record.tank_name.clone()))?;

        let counters = [
            record.kills,
            record.assists,
            record.deaths,
            record.objectives_completed,
            record.objectives_captured,
        ];
        let mut args = Vec::with_capacity(counters.len() + 1);
        for (index, added) in counters.into_iter().enumerate() {
            args.push(Value::Int(totals.get_i64(index)? + i64::from(added)));
        }
        args.push(tank.clone());
        self.database
            .execute(Statement::UpdateTankStatistics, &args)
            .await?;

        let points = match_points(record);
        if points == 0 {
            return Ok(0);
        }

        let rows = self
            .database
            .query(Statement::GetAccountFromTank, &[tank])
            .await?;
        let account = rows
            .first()
            .ok_or_else(|| RecordError::UnknownAccount(record.tank_name.clone()))?
            .get_text(0)?
            .to_string();

        let rows = self
            .database
            .query(Statement::GetAccountPoints, &[account.as_str().into()])
            .await?;
        let current = rows
            .first()
            .ok_or_else(|| RecordError::UnknownAccount(record.tank_name.clone()))?
            .get_i64(0)?;

        let total = current.saturating_add(points as i64);
        self.database
            .execute(Statement::UpdateAccountPoints, &[total.into(), account.into()])
            .await?;

        tracing::debug!(tank = %record.tank_name, points, total, "points awarded");
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use echelon_protocol::{TankAttributes, UserLevel};
    use echelon_store::MemoryDatabase;

    use super::*;

    async fn database() -> Arc<MemoryDatabase> {
        let db = Arc::new(MemoryDatabase::new());
        db.insert_account("alice", "sha256$s$00", UserLevel::MEMBER).await;
        db.insert_tank(
            "alice",
            TankAttributes {
                name: "aliceTank".into(),
                weapon_id: 0,
                speed_factor: 1.0,
                armor_factor: 1.0,
                color: 0,
                points: 0,
            },
        )
        .await;
        db
    }

    fn stats(kills: u32, deaths: u32) -> MatchStatistics {
        MatchStatistics {
            tank_name: "aliceTank".into(),
            kills,
            deaths,
            ..MatchStatistics::default()
        }
    }

    #[tokio::test]
    async fn test_record_all_zero_writes_nothing() {
        let db = database().await;
        let recorder = StatisticsRecorder::new(db.clone());

        let summary = recorder.record(&[stats(0, 0)]).await;

        assert_eq!(summary.skipped, 1);
        assert_eq!(db.write_count(), 0);
        assert_eq!(db.account("alice").await.unwrap().points, 0);
    }

    #[tokio::test]
    async fn test_record_accumulates_totals_and_points() {
        let db = database().await;
        let recorder = StatisticsRecorder::new(db.clone());

        recorder.record(&[stats(2, 1)]).await;
        let summary = recorder.record(&[stats(1, 0)]).await;

        assert_eq!(summary.points_awarded, 10);
        let totals = db.tank_statistics("aliceTank").await.unwrap();
        assert_eq!((totals.kills, totals.deaths), (3, 1));
        assert_eq!(db.account("alice").await.unwrap().points, 30);
    }

    #[tokio::test]
    async fn test_record_deaths_only_updates_totals_without_points() {
        let db = database().await;
        let recorder = StatisticsRecorder::new(db.clone());

        let summary = recorder.record(&[stats(0, 3)]).await;

        assert_eq!(summary.recorded, 1);
        assert_eq!(db.write_count(), 1);
        assert_eq!(db.account("alice").await.unwrap().points, 0);
    }

    #[tokio::test]
    async fn test_record_unknown_tank_does_not_stop_batch() {
        let db = database().await;
        let recorder = StatisticsRecorder::new(db.clone());
        let ghost = MatchStatistics {
            tank_name: "ghostTank".into(),
            kills: 5,
            ..MatchStatistics::default()
        };

        let summary = recorder.record(&[ghost, stats(1, 0)]).await;

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.recorded, 1);
        assert_eq!(db.account("alice").await.unwrap().points, 10);
    }
}
