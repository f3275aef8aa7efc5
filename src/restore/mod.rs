pub(crate) mod orchestrator;
pub(crate) mod partial;

use crate::errors::{AppError, Result};
use chrono::{DateTime, Utc};
use partial::ObjectSelector;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreMode {
    Full,
    Pitr,
    Partial,
}

impl RestoreMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Pitr => "pitr",
            Self::Partial => "partial",
        }
    }
}

/// Restore lifecycle states. Transitions are strictly forward; `Done` and
/// `Failed` are terminal and immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreStatus {
    Preparing,
    Restoring,
    RebuildingIndexes,
    Validating,
    Done,
    Failed,
}

impl RestoreStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Preparing => "preparing",
            Self::Restoring => "restoring",
            Self::RebuildingIndexes => "rebuilding-indexes",
            Self::Validating => "validating",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    fn order(self) -> u8 {
        match self {
            Self::Preparing => 0,
            Self::Restoring => 1,
            Self::RebuildingIndexes => 2,
            Self::Validating => 3,
            Self::Done | Self::Failed => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

#[derive(Debug)]
pub struct RestoreJob {
    pub id: Uuid,
    pub source_artifact_id: Uuid,
    pub mode: RestoreMode,
    pub target_database: String,
    pub recovery_target_time: Option<DateTime<Utc>>,
    pub object_selector: Option<ObjectSelector>,
    status: RestoreStatus,
}

impl RestoreJob {
    pub fn new(
        source_artifact_id: Uuid,
        mode: RestoreMode,
        target_database: String,
        recovery_target_time: Option<DateTime<Utc>>,
        object_selector: Option<ObjectSelector>,
    ) -> Result<Self> {
        match mode {
            RestoreMode::Pitr if recovery_target_time.is_none() => {
                return Err(AppError::InvalidInput(
                    "Point-in-time restore requires a recovery target time".to_string(),
                ));
            }
            RestoreMode::Partial if object_selector.is_none() => {
                return Err(AppError::InvalidInput(
                    "Partial restore requires a table or schema selector".to_string(),
                ));
            }
            _ => {}
        }

        Ok(Self {
            id: Uuid::new_v4(),
            source_artifact_id,
            mode,
            target_database,
            recovery_target_time,
            object_selector,
            status: RestoreStatus::Preparing,
        })
    }

    pub fn status(&self) -> RestoreStatus {
        self.status
    }

    /// Moves the job forward. Backward transitions and any transition out
    /// of a terminal state are rejected.
    pub fn advance(&mut self, next: RestoreStatus) -> Result<()> {
        if self.status.is_terminal() {
            return Err(AppError::InvalidInput(format!(
                "Restore job {} is already terminal ({})",
                self.id,
                self.status.as_str()
            )));
        }
        if next.order() <= self.status.order() && next != RestoreStatus::Failed {
            return Err(AppError::InvalidInput(format!(
                "Restore job {} cannot move backward from {} to {}",
                self.id,
                self.status.as_str(),
                next.as_str()
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Marks the job failed. Valid from any non-terminal state.
    pub fn fail(&mut self) {
        if !self.status.is_terminal() {
            self.status = RestoreStatus::Failed;
        }
    }
}
