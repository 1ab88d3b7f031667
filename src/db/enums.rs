use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a campaign. `queued -> processing -> {completed |
/// completed_with_errors | failed}`, with `paused` reachable from
/// `processing` via an operator action. Terminal states never regress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Queued,
    Processing,
    Completed,
    CompletedWithErrors,
    Failed,
    Paused,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Queued => "queued",
            CampaignStatus::Processing => "processing",
            CampaignStatus::Completed => "completed",
            CampaignStatus::CompletedWithErrors => "completed_with_errors",
            CampaignStatus::Failed => "failed",
            CampaignStatus::Paused => "paused",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CampaignStatus::Completed | CampaignStatus::CompletedWithErrors | CampaignStatus::Failed
        )
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(CampaignStatus::Queued),
            "processing" => Ok(CampaignStatus::Processing),
            "completed" => Ok(CampaignStatus::Completed),
            "completed_with_errors" => Ok(CampaignStatus::CompletedWithErrors),
            "failed" => Ok(CampaignStatus::Failed),
            "paused" => Ok(CampaignStatus::Paused),
            other => Err(format!("unknown campaign status: {other}")),
        }
    }
}

/// Per-message delivery state. The worker writes `sent`/`failed` at send
/// time; the delivery-status ingester moves sent messages onward as gateway
/// callbacks arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Queued,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Queued => "queued",
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
            MessageStatus::Failed => "failed",
        }
    }

    /// Maps a raw gateway callback status onto our message state. Interim
    /// gateway states ("accepted", "sending", "queued") carry no new
    /// information and map to None.
    pub fn from_gateway_status(raw: &str) -> Option<Self> {
        match raw {
            "sent" => Some(MessageStatus::Sent),
            "delivered" => Some(MessageStatus::Delivered),
            "read" => Some(MessageStatus::Read),
            "failed" | "undelivered" => Some(MessageStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscription tiers. Queue priority derives from the tier: paying plans
/// are served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    Pro,
    Standard,
    Free,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Pro => "pro",
            PlanTier::Standard => "standard",
            PlanTier::Free => "free",
        }
    }

    /// Lower number = dequeued first among runnable jobs.
    pub fn queue_priority(&self) -> i32 {
        match self {
            PlanTier::Pro => 1,
            PlanTier::Standard => 2,
            PlanTier::Free => 3,
        }
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pro" => Ok(PlanTier::Pro),
            "standard" => Ok(PlanTier::Standard),
            "free" => Ok(PlanTier::Free),
            other => Err(format!("unknown plan tier: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn campaign_status_round_trips() {
        for status in [
            CampaignStatus::Queued,
            CampaignStatus::Processing,
            CampaignStatus::Completed,
            CampaignStatus::CompletedWithErrors,
            CampaignStatus::Failed,
            CampaignStatus::Paused,
        ] {
            assert_eq!(status.as_str().parse::<CampaignStatus>(), Ok(status));
        }
    }

    #[test]
    fn terminal_statuses() {
        assert!(CampaignStatus::Completed.is_terminal());
        assert!(CampaignStatus::CompletedWithErrors.is_terminal());
        assert!(CampaignStatus::Failed.is_terminal());
        assert!(!CampaignStatus::Paused.is_terminal());
        assert!(!CampaignStatus::Processing.is_terminal());
    }

    #[test]
    fn gateway_status_mapping() {
        assert_eq!(
            MessageStatus::from_gateway_status("delivered"),
            Some(MessageStatus::Delivered)
        );
        assert_eq!(
            MessageStatus::from_gateway_status("undelivered"),
            Some(MessageStatus::Failed)
        );
        assert_eq!(MessageStatus::from_gateway_status("sending"), None);
    }

    #[test]
    fn tier_priorities_are_ordered() {
        assert!(PlanTier::Pro.queue_priority() < PlanTier::Standard.queue_priority());
        assert!(PlanTier::Standard.queue_priority() < PlanTier::Free.queue_priority());
    }
}
