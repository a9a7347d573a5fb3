use chrono::{DateTime, Utc};
use tessera_core::{ApiError, ConflictReport, OpId, Operation, OperationKind};

use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq)]
pub enum PendingStatus {
    Created,
    OptimisticallyApplied,
    Committing,
    Confirmed,
    /// The stored version moved on; waits for a retry or discard.
    Conflicted(Box<ConflictReport>),
    Failed(ApiError),
}

impl PendingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::OptimisticallyApplied => "optimistically-applied",
            Self::Committing => "committing",
            Self::Confirmed => "confirmed",
            Self::Conflicted(_) => "conflicted",
            Self::Failed(_) => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed(_))
    }

    /// Whether the operation's effect belongs in the bus view.
    pub fn is_applied(&self) -> bool {
        matches!(
            self,
            Self::OptimisticallyApplied | Self::Committing | Self::Conflicted(_)
        )
    }

    fn allows(&self, next: &PendingStatus) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::OptimisticallyApplied)
                | (Self::OptimisticallyApplied, Self::Committing)
                | (Self::Committing, Self::Confirmed)
                | (Self::Committing, Self::Conflicted(_))
                | (Self::Committing, Self::Failed(_))
                | (Self::Conflicted(_), Self::OptimisticallyApplied)
        )
    }
}

/// An operation the bus has published but not yet finished with.
#[derive(Debug, Clone)]
pub struct PendingOperation {
    pub operation: Operation,
    pub published_at: DateTime<Utc>,
    status: PendingStatus,
    attempts: u32,
}

impl PendingOperation {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            published_at: Utc::now(),
            status: PendingStatus::Created,
            attempts: 0,
        }
    }

    pub fn op_id(&self) -> OpId {
        self.operation.op_id
    }

    pub fn status(&self) -> &PendingStatus {
        &self.status
    }

    /// Number of commit attempts so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn advance(&mut self, next: PendingStatus) -> Result<(), EngineError> {
        if !self.status.allows(&next) {
            return Err(EngineError::InvalidTransition {
                op_id: self.op_id(),
                from: self.status.as_str(),
                to: next.as_str(),
            });
        }
        if next == PendingStatus::Committing {
            self.attempts += 1;
        }
        self.status = next;
        Ok(())
    }

    pub fn snapshot(&self) -> PendingSnapshot {
        PendingSnapshot {
            op_id: self.op_id(),
            kind: self.operation.kind(),
            status: self.status.as_str(),
            attempts: self.attempts,
            conflict: match &self.status {
                PendingStatus::Conflicted(report) => Some(report.as_ref().clone()),
                _ => None,
            },
        }
    }
}

/// Read-only view of a pending operation for editor components.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSnapshot {
    pub op_id: OpId,
    pub kind: OperationKind,
    pub status: &'static str,
    pub attempts: u32,
    pub conflict: Option<ConflictReport>,
}
