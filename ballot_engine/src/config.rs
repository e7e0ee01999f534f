// ********* Input data structures ***********

use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

/// Declares a closed set of states that is stored as text in the database.
macro_rules! stored_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $label)]
                $variant,
            )+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $label,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = EngineError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($label => Ok($name::$variant),)+
                    other => CorruptRecordSnafu {
                        kind: stringify!($name),
                        value: other,
                    }
                    .fail(),
                }
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

stored_enum!(
    /// Standing of a member in the cooperative. Only active members vote.
    MemberStatus {
        Active => "ACTIVE",
        Inactive => "INACTIVE",
        Suspended => "SUSPENDED",
        Pending => "PENDING",
    }
);

stored_enum!(
    /// Role handed out by the session provider.
    Role {
        Member => "MEMBER",
        Admin => "ADMIN",
    }
);

stored_enum!(
    /// Lifecycle of an election.
    ///
    /// DRAFT → ANNOUNCED → VOTING_ACTIVE → VOTING_CLOSED → RESULTS_CERTIFIED, with CANCELLED
    /// reachable from any state before certification. Transitions are owned by the election
    /// management collaborator; this crate only reads the status.
    ElectionStatus {
        Draft => "DRAFT",
        Announced => "ANNOUNCED",
        VotingActive => "VOTING_ACTIVE",
        VotingClosed => "VOTING_CLOSED",
        ResultsCertified => "RESULTS_CERTIFIED",
        Cancelled => "CANCELLED",
    }
);

stored_enum!(
    /// The declared voting method. Every election is tallied as single choice.
    VoteType {
        SingleChoice => "SINGLE_CHOICE",
        RankedChoice => "RANKED_CHOICE",
        Approval => "APPROVAL",
    }
);

stored_enum!(
    /// Approval state of a candidacy. Only approved candidates can be selected and tallied.
    CandidateStatus {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
        Withdrawn => "withdrawn",
    }
);

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub id: String,
    pub name: String,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub status: MemberStatus,
    pub branch_id: Option<String>,
    pub role: Role,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Election {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: ElectionStatus,
    pub vote_type: VoteType,
    pub voting_start: DateTime<Utc>,
    pub voting_end: DateTime<Utc>,
    pub is_anonymous: bool,
}

impl Election {
    /// Both ends of the voting window are inclusive.
    pub fn window_contains(&self, now: DateTime<Utc>) -> bool {
        self.voting_start <= now && now <= self.voting_end
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub id: String,
    pub election_id: String,
    pub title: String,
    pub description: Option<String>,
    pub order: i64,
}

/// A candidacy as registered by the election management collaborator.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateRecord {
    pub id: String,
    pub election_id: String,
    pub position_id: String,
    pub member_id: String,
    pub status: CandidateStatus,
    pub image: Option<String>,
    pub bio: Option<String>,
    pub qualifications: Option<String>,
}

/// A candidacy joined with the identity of the member standing for it.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Candidate {
    pub id: String,
    pub election_id: String,
    pub position_id: String,
    pub member_id: String,
    pub name: String,
    pub email: Option<String>,
    pub image: Option<String>,
    pub bio: Option<String>,
    pub qualifications: Option<String>,
    pub status: CandidateStatus,
}

/// One line of a ballot. A missing candidate is an abstention for that position.
#[derive(Eq, PartialEq, Debug, Clone, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub position_id: String,
    pub candidate_id: Option<String>,
}

/// A stored vote row, joined with what the tally needs to know about the voter.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct CastVote {
    pub position_id: String,
    pub candidate_id: Option<String>,
    pub member_id: String,
    pub member_active: bool,
    pub branch_id: Option<String>,
    pub branch_name: Option<String>,
}

/// Number of active members of one branch. `branch_id == None` collects members
/// without a branch.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct BranchElectorate {
    pub branch_id: Option<String>,
    pub branch_name: Option<String>,
    pub active_members: u64,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: i64,
    pub member_id: String,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Identity of the caller, as supplied by the session provider.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Session {
    pub member_id: String,
    pub role: Role,
}

impl Session {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

// ******** Output data structures *********

/// Why the eligibility gate turned a member away.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash)]
pub enum Denial {
    MemberNotActive,
    ElectionNotOpen,
    OutsideWindow,
    AlreadyVoted,
}

impl Display for Denial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Denial::MemberNotActive => "Only active members can vote",
            Denial::ElectionNotOpen => "Election is not open for voting",
            Denial::OutsideWindow => "Election is outside its voting period",
            Denial::AlreadyVoted => "You have already voted in this election",
        };
        f.write_str(msg)
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum Eligibility {
    Allowed,
    Denied(Denial),
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteReceipt {
    pub id: String,
    pub vote_token: String,
}

/// What the voter gets back once the ballot is committed.
#[derive(Eq, PartialEq, Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BallotReceipt {
    pub ballot_id: String,
    pub election_id: String,
    pub member_id: String,
    pub cast_at: DateTime<Utc>,
    pub votes: Vec<VoteReceipt>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EligibleElection {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub voting_start: DateTime<Utc>,
    pub voting_end: DateTime<Utc>,
    pub positions: u64,
    pub has_voted: bool,
    pub can_vote: bool,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KioskLogin {
    pub member_id: String,
    pub pending_elections: Vec<String>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectionHeader {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: ElectionStatus,
    pub vote_type: VoteType,
    pub voting_start: DateTime<Utc>,
    pub voting_end: DateTime<Utc>,
    pub is_anonymous: bool,
}

impl From<&Election> for ElectionHeader {
    fn from(e: &Election) -> Self {
        ElectionHeader {
            id: e.id.clone(),
            title: e.title.clone(),
            description: e.description.clone(),
            status: e.status,
            vote_type: e.vote_type,
            voting_start: e.voting_start,
            voting_end: e.voting_end,
            is_anonymous: e.is_anonymous,
        }
    }
}

#[derive(PartialEq, Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchVotes {
    pub branch_id: String,
    pub branch_name: String,
    pub votes: u64,
    pub participation_rate: f64,
}

#[derive(PartialEq, Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateResult {
    pub candidate_id: String,
    pub member_id: Option<String>,
    pub name: String,
    pub email: Option<String>,
    pub image: Option<String>,
    pub bio: Option<String>,
    pub qualifications: Option<String>,
    pub vote_count: u64,
    pub percentage: f64,
    /// 1-based rank within the position.
    pub rank: u32,
    pub branch_breakdown: Vec<BranchVotes>,
}

#[derive(PartialEq, Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionResult {
    pub position_id: String,
    pub title: String,
    pub description: Option<String>,
    pub order: i64,
    pub total_votes: u64,
    pub abstentions: u64,
    pub total_eligible_members: u64,
    pub participation_rate: f64,
    pub candidates: Vec<CandidateResult>,
}

#[derive(PartialEq, Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TallySummary {
    pub total_positions: u64,
    pub total_candidates: u64,
    pub total_votes: u64,
    pub total_voters: u64,
    pub total_eligible_members: u64,
    pub participation_rate: f64,
}

#[derive(PartialEq, Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchRollup {
    pub branch_id: String,
    pub branch_name: String,
    pub total_votes: u64,
    pub voters: u64,
    pub eligible_members: u64,
    pub participation_rate: f64,
}

#[derive(PartialEq, Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TallyReport {
    pub election: ElectionHeader,
    pub positions: Vec<PositionResult>,
    pub summary: TallySummary,
    pub branch_breakdown: Vec<BranchRollup>,
}

#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Anonymity {
    pub is_enabled: bool,
    pub can_reveal: bool,
    pub is_revealed: bool,
}

/// The results as they may be shown to a given requester.
#[derive(PartialEq, Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayReport {
    pub election: ElectionHeader,
    pub anonymity: Anonymity,
    pub results: Vec<PositionResult>,
    pub summary: TallySummary,
    pub branch_breakdown: Vec<BranchRollup>,
}

// ******** Errors *********

/// The user-facing failure categories. Every error maps to exactly one.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash)]
pub enum ErrorKind {
    Unauthorized,
    Forbidden,
    NotFound,
    InvalidState,
    AlreadyVoted,
    ValidationError,
    Internal,
}

impl ErrorKind {
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::Unauthorized => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::InvalidState => 400,
            ErrorKind::AlreadyVoted => 400,
            ErrorKind::ValidationError => 400,
            ErrorKind::Internal => 500,
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum EngineError {
    #[snafu(display("{denial}"))]
    Ineligible { denial: Denial },

    #[snafu(display("Authentication required"))]
    Unauthorized {},

    #[snafu(display("{message}"))]
    Forbidden { message: String },

    #[snafu(display("Election {election_id} not found"))]
    ElectionNotFound { election_id: String },

    #[snafu(display("{message}"))]
    Validation { message: String },

    #[snafu(display("Unexpected {kind} value {value:?} in storage"))]
    CorruptRecord { kind: &'static str, value: String },

    #[snafu(display("Storage failure: {source}"))]
    Storage { source: sqlx::Error },

    #[snafu(display("Could not encode audit details: {source}"))]
    AuditEncoding { source: serde_json::Error },
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Ineligible { denial } => match denial {
                Denial::MemberNotActive => ErrorKind::Forbidden,
                Denial::ElectionNotOpen | Denial::OutsideWindow => ErrorKind::InvalidState,
                Denial::AlreadyVoted => ErrorKind::AlreadyVoted,
            },
            EngineError::Unauthorized {} => ErrorKind::Unauthorized,
            EngineError::Forbidden { .. } => ErrorKind::Forbidden,
            EngineError::ElectionNotFound { .. } => ErrorKind::NotFound,
            EngineError::Validation { .. } => ErrorKind::ValidationError,
            EngineError::CorruptRecord { .. }
            | EngineError::Storage { .. }
            | EngineError::AuditEncoding { .. } => ErrorKind::Internal,
        }
    }

    /// The message a client may see. Internal failures never leak their detail.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Internal => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

// ********* Time **********

/// Source of the current time. Injected so the voting window can be tested.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Always returns the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
