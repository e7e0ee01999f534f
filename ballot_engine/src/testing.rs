//! Seeded databases shared by the unit tests.

use chrono::{DateTime, TimeZone, Utc};

use crate::casting;
use crate::config::*;
use crate::store::Store;

pub const ELECTION: &str = "election-2026";
pub const P1: &str = "pos-chair";
pub const P2: &str = "pos-treasurer";
pub const C1: &str = "cand-alice";
pub const C2: &str = "cand-bob";
pub const C3: &str = "cand-dave";
pub const C4: &str = "cand-carol";
pub const C_PENDING: &str = "cand-carol-chair";
pub const OTHER_ELECTION: &str = "election-2027";
pub const OTHER_CANDIDATE: &str = "cand-bob-2027";
pub const NORTH: &str = "north";
pub const SOUTH: &str = "south";

pub fn voting_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
}

pub fn voting_end() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 3, 20, 0, 0).unwrap()
}

pub fn sample_election() -> Election {
    Election {
        id: ELECTION.to_string(),
        title: "Board election 2026".to_string(),
        description: Some("Annual board renewal".to_string()),
        status: ElectionStatus::VotingActive,
        vote_type: VoteType::SingleChoice,
        voting_start: voting_start(),
        voting_end: voting_end(),
        is_anonymous: false,
    }
}

pub fn position(id: &str, order: i64) -> Position {
    Position {
        id: id.to_string(),
        election_id: ELECTION.to_string(),
        title: id.to_string(),
        description: None,
        order,
    }
}

fn member(id: &str, name: &str, status: MemberStatus, branch: Option<&str>) -> Member {
    Member {
        id: id.to_string(),
        name: name.to_string(),
        email: Some(format!("{}@coop.example", id)),
        status,
        branch_id: branch.map(|b| b.to_string()),
        role: Role::Member,
    }
}

fn candidacy(
    id: &str,
    election_id: &str,
    position_id: &str,
    member_id: &str,
    status: CandidateStatus,
) -> CandidateRecord {
    CandidateRecord {
        id: id.to_string(),
        election_id: election_id.to_string(),
        position_id: position_id.to_string(),
        member_id: member_id.to_string(),
        status,
        image: Some(format!("/img/{}.png", member_id)),
        bio: Some(format!("{} has been a member for years", member_id)),
        qualifications: None,
    }
}

pub struct Fixture {
    pub store: Store,
    pub clock: FixedClock,
}

impl Fixture {
    /// One open election with two positions.
    ///
    /// Members: alice and bob (active, north), dave (active, no branch) and carol-inactive
    /// (inactive, south). The chair has alice and bob standing plus a pending candidacy, the
    /// treasurer has dave and carol.
    pub async fn two_positions() -> Fixture {
        let _ = env_logger::builder().is_test(true).try_init();
        let store = Store::in_memory().await.unwrap();
        store.init_schema().await.unwrap();

        for (id, name) in [(NORTH, "North"), (SOUTH, "South")] {
            store
                .insert_branch(&Branch {
                    id: id.to_string(),
                    name: name.to_string(),
                })
                .await
                .unwrap();
        }
        for m in [
            member("alice", "Alice Martin", MemberStatus::Active, Some(NORTH)),
            member("bob", "Bob Durand", MemberStatus::Active, Some(NORTH)),
            member("dave", "Dave Okafor", MemberStatus::Active, None),
            member("carol-inactive", "Carol Lee", MemberStatus::Inactive, Some(SOUTH)),
        ] {
            store.insert_member(&m).await.unwrap();
        }

        store.insert_election(&sample_election()).await.unwrap();
        let mut chair = position(P1, 1);
        chair.title = "Chair".to_string();
        let mut treasurer = position(P2, 2);
        treasurer.title = "Treasurer".to_string();
        // Inserted out of order on purpose: display order comes from `order`.
        store.insert_position(&treasurer).await.unwrap();
        store.insert_position(&chair).await.unwrap();

        for c in [
            candidacy(C1, ELECTION, P1, "alice", CandidateStatus::Approved),
            candidacy(C2, ELECTION, P1, "bob", CandidateStatus::Approved),
            candidacy(C_PENDING, ELECTION, P1, "carol-inactive", CandidateStatus::Pending),
            candidacy(C3, ELECTION, P2, "dave", CandidateStatus::Approved),
            candidacy(C4, ELECTION, P2, "carol-inactive", CandidateStatus::Approved),
        ] {
            store.insert_candidate(&c).await.unwrap();
        }

        Fixture {
            store,
            clock: FixedClock(Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()),
        }
    }

    /// A second election, announced but not open yet, with one approved candidate.
    pub async fn add_second_election(&self) {
        let mut e = sample_election();
        e.id = OTHER_ELECTION.to_string();
        e.title = "Board election 2027".to_string();
        e.status = ElectionStatus::Announced;
        self.store.insert_election(&e).await.unwrap();
        let mut p = position("pos-chair-2027", 1);
        p.election_id = OTHER_ELECTION.to_string();
        self.store.insert_position(&p).await.unwrap();
        self.store
            .insert_candidate(&candidacy(
                OTHER_CANDIDATE,
                OTHER_ELECTION,
                "pos-chair-2027",
                "bob",
                CandidateStatus::Approved,
            ))
            .await
            .unwrap();
    }

    pub async fn cast(
        &self,
        member_id: &str,
        ballot: &[(&str, Option<&str>)],
    ) -> EngineResult<BallotReceipt> {
        casting::cast_ballot(
            &self.store,
            &self.clock,
            member_id,
            ELECTION,
            &selections(ballot),
        )
        .await
    }

    /// Commits a valid ballot without running the eligibility pre-check.
    pub async fn cast_skipping_precheck(&self, member_id: &str) -> EngineResult<BallotReceipt> {
        casting::commit_ballot(
            &self.store,
            member_id,
            ELECTION,
            &selections(&[(P1, Some(C1)), (P2, Some(C3))]),
            self.clock.0,
        )
        .await
    }

    pub async fn vote_rows(&self) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM vote")
            .fetch_one(self.store.pool())
            .await
            .unwrap()
    }

    pub async fn ballot_rows(&self) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM ballot")
            .fetch_one(self.store.pool())
            .await
            .unwrap()
    }
}

pub fn selections(ballot: &[(&str, Option<&str>)]) -> Vec<Selection> {
    ballot
        .iter()
        .map(|(pid, cid)| Selection {
            position_id: pid.to_string(),
            candidate_id: cid.map(|c| c.to_string()),
        })
        .collect()
}
