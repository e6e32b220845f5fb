//! CRM deal pipeline stages and the rules that derive them.
//!
//! Two derivations exist and both live here:
//!
//! - [`DealStage::for_status`] maps a subscription status to a stage. Every
//!   webhook-driven deal write goes through it.
//! - [`DealStage::expected_for_start_date`] derives a stage purely from the
//!   calendar distance to the first subscription date. The daily sweep uses it.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::SubscriptionStatus;

/// Days before the start date at which a deal is qualified to buy.
pub const QUALIFIED_DAYS_OUT: i64 = 7;

/// Days before the start date at which a presentation is scheduled.
pub const PRESENTATION_DAYS_OUT: i64 = 2;

/// Stage of a deal in HubSpot's default sales pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DealStage {
    AppointmentScheduled,
    QualifiedToBuy,
    PresentationScheduled,
    DecisionMakerBoughtIn,
    ContractSent,
    ClosedWon,
    ClosedLost,
}

impl DealStage {
    /// Stage a deal should be in for the given subscription status.
    pub fn for_status(status: SubscriptionStatus) -> Self {
        match status {
            SubscriptionStatus::Active => DealStage::ContractSent,
            SubscriptionStatus::PastDue => DealStage::DecisionMakerBoughtIn,
            SubscriptionStatus::Canceled
            | SubscriptionStatus::Unpaid
            | SubscriptionStatus::IncompleteExpired => DealStage::ClosedLost,
            SubscriptionStatus::Incomplete => DealStage::AppointmentScheduled,
        }
    }

    /// Stage implied by the number of calendar days until `start`.
    ///
    /// Returns `None` when no time-based rule applies to this offset.
    pub fn expected_for_start_date(start: NaiveDate, today: NaiveDate) -> Option<Self> {
        let days_out = (start - today).num_days();
        match days_out {
            QUALIFIED_DAYS_OUT => Some(DealStage::QualifiedToBuy),
            PRESENTATION_DAYS_OUT => Some(DealStage::PresentationScheduled),
            d if d < 0 => Some(DealStage::DecisionMakerBoughtIn),
            _ => None,
        }
    }

    /// Closed-won and closed-lost are terminal; only a status change moves a
    /// deal out of them.
    pub fn is_closed(&self) -> bool {
        matches!(self, DealStage::ClosedWon | DealStage::ClosedLost)
    }

    /// HubSpot internal stage value.
    pub fn as_str(&self) -> &'static str {
        match self {
            DealStage::AppointmentScheduled => "appointmentscheduled",
            DealStage::QualifiedToBuy => "qualifiedtobuy",
            DealStage::PresentationScheduled => "presentationscheduled",
            DealStage::DecisionMakerBoughtIn => "decisionmakerboughtin",
            DealStage::ContractSent => "contractsent",
            DealStage::ClosedWon => "closedwon",
            DealStage::ClosedLost => "closedlost",
        }
    }
}

impl fmt::Display for DealStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown deal stage: {0}")]
pub struct UnknownDealStage(pub String);

impl FromStr for DealStage {
    type Err = UnknownDealStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "appointmentscheduled" => Ok(DealStage::AppointmentScheduled),
            "qualifiedtobuy" => Ok(DealStage::QualifiedToBuy),
            "presentationscheduled" => Ok(DealStage::PresentationScheduled),
            "decisionmakerboughtin" => Ok(DealStage::DecisionMakerBoughtIn),
            "contractsent" => Ok(DealStage::ContractSent),
            "closedwon" => Ok(DealStage::ClosedWon),
            "closedlost" => Ok(DealStage::ClosedLost),
            other => Err(UnknownDealStage(other.to_string())),
        }
    }
}
