//! Audit log entries.
//!
//! Entries are built here and appended in the same commit as the mutation
//! they describe. Nothing in the crate updates or deletes them.

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use super::Workflow;
use crate::error::AppError;
use crate::models::activity::{ActionType, ActivityFilter, ActivityLog, TargetRef};
use crate::store::Write;

fn entry(
    team_id: Uuid,
    actor_id: Uuid,
    action: ActionType,
    target: TargetRef,
    details: Value,
) -> ActivityLog {
    ActivityLog {
        id: Uuid::new_v4(),
        team_id,
        actor_id,
        action,
        target,
        details,
        created_at: Utc::now(),
    }
}

pub fn append(
    team_id: Uuid,
    actor_id: Uuid,
    action: ActionType,
    target: TargetRef,
    details: Value,
) -> Write {
    Write::AppendLog(entry(team_id, actor_id, action, target, details))
}

impl Workflow {
    /// The team's audit trail, newest first. Any member may read it.
    pub async fn list_activity(
        &self,
        actor_id: Uuid,
        team_id: Uuid,
        filter: &ActivityFilter,
    ) -> Result<Vec<ActivityLog>, AppError> {
        self.member(actor_id, team_id).await?;
        Ok(self.store.list_activity(team_id, filter).await?)
    }
}
