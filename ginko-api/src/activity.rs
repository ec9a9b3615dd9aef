use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use neo4rs::{query, Row};

use crate::graph::{parse_timestamp, GraphSession};
use crate::models::{ActivityType, HotnessLevel, UserActivity};

/// Upserts `UserActivity` rows and computes task hotness from inbound
/// `RECENT_ACTIVITY` events, the two graph-native responsibilities grouped
/// under task activity in the component design.
#[derive(Clone)]
pub struct ActivityService {
    session: GraphSession,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TaskActivitySummary {
    pub score: u32,
    pub level: HotnessLevel,
    pub count_24h: u32,
    pub count_7d: u32,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub recent_events: Vec<crate::models::Event>,
}

impl ActivityService {
    pub fn new(session: GraphSession) -> Self {
        Self { session }
    }

    /// Upserts the principal's `UserActivity` row, mapping a task status
    /// transition to an activity type per the transition contract's step 5.
    pub async fn record(&self, graph_id: &str, user_id: &str, activity_type: ActivityType) -> Result<()> {
        let now = Utc::now();
        let mut txn = self.session.begin_write().await?;
        let result = txn
            .run(
                query(
                    r#"MERGE (a:UserActivity {graph_id: $graph_id, user_id: $user_id})
                       ON CREATE SET a.session_count = 1
                       ON MATCH SET a.session_count = a.session_count + 1
                       SET a.last_activity_at = $now, a.last_activity_type = $activity_type"#,
                )
                .param("graph_id", graph_id)
                .param("user_id", user_id)
                .param("now", now.to_rfc3339())
                .param("activity_type", activity_type_str(activity_type)),
            )
            .await;

        match result {
            Ok(_) => {
                self.session.commit(txn).await?;
                Ok(())
            }
            Err(e) => {
                self.session.rollback(txn).await;
                Err(e.into())
            }
        }
    }

    pub async fn get(&self, graph_id: &str, user_id: &str) -> Result<Option<UserActivity>> {
        let rows = self
            .session
            .read(
                query("MATCH (a:UserActivity {graph_id: $graph_id, user_id: $user_id}) RETURN a")
                    .param("graph_id", graph_id)
                    .param("user_id", user_id),
                row_to_activity,
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    /// Piecewise-weighted hotness over the inbound `RECENT_ACTIVITY` events
    /// from the last 7 days: age ≤ 4h → 30, ≤ 24h → 20, ≤ 7d → 10; summed
    /// and capped at 100. Future-dated events (clock skew) are ignored.
    pub async fn task_hotness(&self, graph_id: &str, task_id: &str) -> Result<TaskActivitySummary> {
        let rows = self
            .session
            .read(
                query(
                    r#"MATCH (e:Event)-[:RECENT_ACTIVITY]->(t:Task {graph_id: $graph_id, id: $task_id})
                       RETURN e ORDER BY e.timestamp DESC LIMIT 200"#,
                )
                .param("graph_id", graph_id)
                .param("task_id", task_id),
                crate::events::row_to_event,
            )
            .await?;

        let now = Utc::now();
        let window_start = now - Duration::days(7);
        let mut score: u32 = 0;
        let mut count_24h = 0u32;
        let mut count_7d = 0u32;
        let mut last_activity_at = None;

        for event in &rows {
            if event.timestamp > now {
                continue; // clock skew
            }
            if event.timestamp < window_start {
                continue;
            }
            count_7d += 1;
            let age = now - event.timestamp;
            if age <= Duration::hours(24) {
                count_24h += 1;
            }
            if last_activity_at.is_none() {
                last_activity_at = Some(event.timestamp);
            }
            score += if age <= Duration::hours(4) {
                30
            } else if age <= Duration::hours(24) {
                20
            } else {
                10
            };
        }
        score = score.min(100);

        Ok(TaskActivitySummary {
            score,
            level: HotnessLevel::classify(score),
            count_24h,
            count_7d,
            last_activity_at,
            recent_events: rows.into_iter().take(10).collect(),
        })
    }
}

fn activity_type_str(t: ActivityType) -> &'static str {
    match t {
        ActivityType::SessionStart => "session_start",
        ActivityType::TaskStart => "task_start",
        ActivityType::TaskComplete => "task_complete",
        ActivityType::TaskBlock => "task_block",
        ActivityType::EventLogged => "event_logged",
    }
}

fn row_to_activity(row: Row) -> Result<UserActivity> {
    let node: neo4rs::Node = row.get("a")?;
    let activity_type = match node
        .get::<String>("last_activity_type")
        .unwrap_or_default()
        .as_str()
    {
        "task_start" => ActivityType::TaskStart,
        "task_complete" => ActivityType::TaskComplete,
        "task_block" => ActivityType::TaskBlock,
        "event_logged" => ActivityType::EventLogged,
        _ => ActivityType::SessionStart,
    };

    Ok(UserActivity {
        graph_id: node.get("graph_id")?,
        user_id: node.get("user_id")?,
        last_activity_at: parse_timestamp(&node.get::<String>("last_activity_at")?),
        last_activity_type: activity_type,
        session_count: node.get("session_count").unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HotnessLevel;

    #[test]
    fn hotness_bands_round_trip_classification() {
        assert_eq!(HotnessLevel::classify(0), HotnessLevel::Cold);
        assert_eq!(HotnessLevel::classify(45), HotnessLevel::Hot);
        assert_eq!(HotnessLevel::classify(95), HotnessLevel::Blazing);
    }
}
