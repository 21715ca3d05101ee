use serde::{Deserialize, Serialize};

/// Lifecycle of a contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u64)]
pub enum ContractStatus {
    /// Created, awaiting both signatures.
    Pending = 0,
    /// Both participants signed. Funding may be broadcast and confirmed.
    Active = 1,
    /// Settled against an oracle price.
    Executed = 2,
    /// Withdrawn before activation.
    Cancelled = 3,
    /// Passed `expires_at` before execution.
    Expired = 4,
}

impl ContractStatus {
    pub fn from_u64(v: u64) -> Option<Self> {
        match v {
            0 => Some(Self::Pending),
            1 => Some(Self::Active),
            2 => Some(Self::Executed),
            3 => Some(Self::Cancelled),
            4 => Some(Self::Expired),
            _ => None,
        }
    }

    pub fn as_u64(self) -> u64 {
        self as u64
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Executed | Self::Cancelled | Self::Expired)
    }

    /// Whether `self -> to` is an edge of the lifecycle.
    pub fn can_transition_to(self, to: ContractStatus) -> bool {
        use ContractStatus::*;
        matches!(
            (self, to),
            (Pending, Active)
                | (Active, Executed)
                | (Pending, Expired)
                | (Active, Expired)
                | (Pending, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Executed => "executed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }
}

/// Funding transaction pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u64)]
pub enum TransactionStatus {
    PendingSignatures = 0,
    /// Both signatures present, finalized.
    Ready = 1,
    /// Handed to the broadcast service, awaiting confirmation.
    Broadcast = 2,
    Confirmed = 3,
}

impl TransactionStatus {
    pub fn from_u64(v: u64) -> Option<Self> {
        match v {
            0 => Some(Self::PendingSignatures),
            1 => Some(Self::Ready),
            2 => Some(Self::Broadcast),
            3 => Some(Self::Confirmed),
            _ => None,
        }
    }

    pub fn as_u64(self) -> u64 {
        self as u64
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PendingSignatures => "pending_signatures",
            Self::Ready => "ready",
            Self::Broadcast => "broadcast",
            Self::Confirmed => "confirmed",
        }
    }
}
