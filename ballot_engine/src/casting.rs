//! Ballot casting: one complete ballot per member and election, written atomically.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rand::Rng;
use serde_json::json;
use snafu::prelude::*;

use crate::config::*;
use crate::eligibility;
use crate::store::{self, NewVote, Store};

pub const VOTE_CAST_ACTION: &str = "VOTE_CAST";

/// Casts the ballot of `member_id` in `election_id`.
///
/// The eligibility gate runs first as a cheap rejection. The write then happens in a single
/// transaction that claims the (member, election) ballot row, whose unique constraint is the
/// real guard against double voting, re-checks the member and election, inserts one vote per
/// position and the audit record. Nothing is persisted unless everything is.
pub async fn cast_ballot(
    store: &Store,
    clock: &dyn Clock,
    member_id: &str,
    election_id: &str,
    selections: &[Selection],
) -> EngineResult<BallotReceipt> {
    let now = clock.now();
    {
        let mut conn = store.pool().acquire().await.context(StorageSnafu)?;
        let election = store::fetch_election(&mut conn, election_id)
            .await?
            .context(ElectionNotFoundSnafu { election_id })?;
        let denial =
            match eligibility::check_standing(&mut conn, member_id, Some(&election), now).await? {
                Some(d) => Some(d),
                None => eligibility::check_not_voted(&mut conn, member_id, election_id).await?,
            };
        if let Some(denial) = denial {
            info!(
                "cast_ballot: member {} rejected for election {}: {:?}",
                member_id, election_id, denial
            );
            return IneligibleSnafu { denial }.fail();
        }
    }
    commit_ballot(store, member_id, election_id, selections, now).await
}

/// The transactional half of [`cast_ballot`]. Correct on its own: a duplicate ballot is
/// caught by the storage constraint and reported exactly like the pre-check does.
pub(crate) async fn commit_ballot(
    store: &Store,
    member_id: &str,
    election_id: &str,
    selections: &[Selection],
    now: DateTime<Utc>,
) -> EngineResult<BallotReceipt> {
    let ballot_id = new_id("ballot");
    let mut tx = store.pool().begin().await.context(StorageSnafu)?;

    match store::insert_ballot(&mut tx, &ballot_id, election_id, member_id, now).await {
        Ok(()) => {}
        Err(e) if store::is_unique_violation(&e) => {
            info!(
                "cast_ballot: member {} lost the race for election {}",
                member_id, election_id
            );
            return IneligibleSnafu {
                denial: Denial::AlreadyVoted,
            }
            .fail();
        }
        Err(source) => return Err(EngineError::Storage { source }),
    }

    // Status and window may have moved since the pre-check.
    let election = store::fetch_election(&mut tx, election_id)
        .await?
        .context(ElectionNotFoundSnafu { election_id })?;
    if let Some(denial) =
        eligibility::check_standing(&mut tx, member_id, Some(&election), now).await?
    {
        return IneligibleSnafu { denial }.fail();
    }

    let positions = store::fetch_positions(&mut tx, election_id).await?;
    let candidates = store::fetch_approved_candidates(&mut tx, election_id).await?;
    let ordered = validate_selections(&positions, &candidates, selections)?;

    let mut votes = Vec::with_capacity(ordered.len());
    for sel in ordered.iter() {
        let receipt = VoteReceipt {
            id: new_id("vote"),
            vote_token: new_token(),
        };
        store::insert_vote(
            &mut tx,
            &NewVote {
                id: &receipt.id,
                ballot_id: &ballot_id,
                election_id,
                position_id: &sel.position_id,
                candidate_id: sel.candidate_id.as_deref(),
                member_id,
                vote_token: &receipt.vote_token,
                created_at: now,
            },
        )
        .await?;
        votes.push(receipt);
    }

    let details = json!({
        "ballotId": ballot_id,
        "electionId": election_id,
        "castAt": now,
        "selections": ordered,
    });
    store::insert_audit(
        &mut tx,
        member_id,
        VOTE_CAST_ACTION,
        "election",
        election_id,
        &details,
        now,
    )
    .await?;

    tx.commit().await.context(StorageSnafu)?;
    info!(
        "cast_ballot: member {} cast {} votes in election {}",
        member_id,
        votes.len(),
        election_id
    );

    Ok(BallotReceipt {
        ballot_id,
        election_id: election_id.to_string(),
        member_id: member_id.to_string(),
        cast_at: now,
        votes,
    })
}

/// Checks that the ballot has exactly one line per position of the election and that every
/// chosen candidate is approved for that very position.
///
/// Returns the selections in position display order.
pub fn validate_selections<'a>(
    positions: &[Position],
    candidates: &[Candidate],
    selections: &'a [Selection],
) -> EngineResult<Vec<&'a Selection>> {
    ensure!(
        !positions.is_empty(),
        ValidationSnafu {
            message: "This election has no positions to vote on"
        }
    );

    let known: HashSet<&str> = positions.iter().map(|p| p.id.as_str()).collect();
    let mut by_position: HashMap<&str, &Selection> = HashMap::new();
    for sel in selections.iter() {
        ensure!(
            known.contains(sel.position_id.as_str()),
            ValidationSnafu {
                message: format!("Position {} does not belong to this election", sel.position_id)
            }
        );
        ensure!(
            by_position.insert(sel.position_id.as_str(), sel).is_none(),
            ValidationSnafu {
                message: format!("More than one vote for position {}", sel.position_id)
            }
        );
    }

    let missing: Vec<&str> = positions
        .iter()
        .map(|p| p.id.as_str())
        .filter(|pid| !by_position.contains_key(pid))
        .collect();
    if !missing.is_empty() {
        debug!("validate_selections: missing positions {:?}", missing);
        return ValidationSnafu {
            message: format!(
                "Please vote for all positions, missing: {}",
                missing.join(", ")
            ),
        }
        .fail();
    }

    let mut ordered = Vec::with_capacity(positions.len());
    for p in positions.iter() {
        let sel = by_position[p.id.as_str()];
        if let Some(cid) = sel.candidate_id.as_deref() {
            let valid = candidates.iter().any(|c| {
                c.id == cid
                    && c.position_id == p.id
                    && c.election_id == p.election_id
                    && c.status == CandidateStatus::Approved
            });
            if !valid {
                warn!(
                    "validate_selections: candidate {} is not approved for position {}",
                    cid, p.id
                );
                return ValidationSnafu {
                    message: format!("Invalid candidate {} for position {}", cid, p.id),
                }
                .fail();
            }
        }
        ordered.push(sel);
    }
    Ok(ordered)
}

fn random_hex(bytes: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..bytes).map(|_| format!("{:02x}", rng.gen::<u8>())).collect()
}

pub(crate) fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, random_hex(12))
}

/// An opaque receipt token. It is random, so it says nothing about the vote it belongs to.
pub(crate) fn new_token() -> String {
    random_hex(32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;

    fn sel(pid: &str, cid: Option<&str>) -> Selection {
        Selection {
            position_id: pid.to_string(),
            candidate_id: cid.map(|c| c.to_string()),
        }
    }

    #[tokio::test]
    async fn complete_ballot_is_committed() {
        let fx = Fixture::two_positions().await;
        let receipt = fx.cast("alice", &[(P1, Some(C1)), (P2, None)]).await.unwrap();
        assert_eq!(receipt.votes.len(), 2);
        assert_ne!(receipt.votes[0].vote_token, receipt.votes[1].vote_token);
        assert_eq!(receipt.votes[0].vote_token.len(), 64);
        assert_eq!(fx.vote_rows().await, 2);

        let audit = fx.store.audit_entries(ELECTION).await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, VOTE_CAST_ACTION);
        assert_eq!(audit[0].member_id, "alice");
        let recorded = audit[0].details["selections"].as_array().unwrap();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0]["positionId"], P1);
        assert_eq!(recorded[0]["candidateId"], C1);
        assert!(recorded[1]["candidateId"].is_null());
    }

    #[tokio::test]
    async fn second_ballot_is_already_voted() {
        let fx = Fixture::two_positions().await;
        fx.cast("alice", &[(P1, Some(C1)), (P2, Some(C3))]).await.unwrap();
        let err = fx
            .cast("alice", &[(P1, Some(C2)), (P2, Some(C4))])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyVoted);
        assert_eq!(fx.vote_rows().await, 2);
    }

    #[tokio::test]
    async fn constraint_and_precheck_report_the_same_error() {
        let fx = Fixture::two_positions().await;
        fx.cast("alice", &[(P1, Some(C1)), (P2, Some(C3))]).await.unwrap();
        let precheck = fx
            .cast("alice", &[(P1, Some(C1)), (P2, Some(C3))])
            .await
            .unwrap_err();

        // Skip the pre-check and go straight at the constraint.
        let mut conn = fx.store.pool().acquire().await.unwrap();
        let raw = store::insert_ballot(&mut conn, "ballot_x", ELECTION, "alice", fx.clock.0)
            .await
            .unwrap_err();
        assert!(store::is_unique_violation(&raw));
        drop(conn);

        let constraint = fx.cast_skipping_precheck("alice").await.unwrap_err();
        assert_eq!(precheck.kind(), ErrorKind::AlreadyVoted);
        assert_eq!(constraint.kind(), precheck.kind());
        assert_eq!(constraint.public_message(), precheck.public_message());
    }

    #[tokio::test]
    async fn concurrent_ballots_have_a_single_winner() {
        let fx = Fixture::two_positions().await;
        let a = vec![sel(P1, Some(C1)), sel(P2, Some(C3))];
        let b = vec![sel(P1, Some(C2)), sel(P2, Some(C4))];
        let (ra, rb) = tokio::join!(
            cast_ballot(&fx.store, &fx.clock, "alice", ELECTION, &a),
            cast_ballot(&fx.store, &fx.clock, "alice", ELECTION, &b),
        );
        let outcomes = [ra, rb];
        let ok = outcomes.iter().filter(|r| r.is_ok()).count();
        assert_eq!(ok, 1);
        for r in outcomes.iter() {
            if let Err(e) = r {
                assert_eq!(e.kind(), ErrorKind::AlreadyVoted);
            }
        }
        assert_eq!(fx.vote_rows().await, 2);
    }

    #[tokio::test]
    async fn incomplete_ballot_is_rejected() {
        let fx = Fixture::two_positions().await;
        let err = fx.cast("alice", &[(P1, Some(C1))]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
        assert!(err.to_string().contains(P2));
        assert_eq!(fx.vote_rows().await, 0);
        // A rejected ballot does not count as having voted.
        fx.cast("alice", &[(P1, Some(C1)), (P2, Some(C3))]).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_duplicate_and_misplaced_selections_are_rejected() {
        let fx = Fixture::two_positions().await;
        for ballot in [
            vec![(P1, Some(C1)), (P2, Some(C3)), ("p-unknown", None)],
            vec![(P1, Some(C1)), (P1, Some(C2)), (P2, Some(C3))],
            vec![(P1, Some(C3)), (P2, Some(C3))],
            vec![(P1, Some(C1)), (P2, Some("c-missing"))],
            vec![(P1, Some(C_PENDING)), (P2, Some(C3))],
        ] {
            let err = fx.cast("alice", &ballot).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ValidationError, "{:?}", ballot);
        }
        assert_eq!(fx.vote_rows().await, 0);
    }

    #[tokio::test]
    async fn candidate_from_another_election_is_rejected() {
        let fx = Fixture::two_positions().await;
        fx.add_second_election().await;
        let err = fx
            .cast("alice", &[(P1, Some(OTHER_CANDIDATE)), (P2, Some(C3))])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }

    #[tokio::test]
    async fn ineligible_members_and_elections() {
        let fx = Fixture::two_positions().await;
        let err = fx
            .cast("carol-inactive", &[(P1, Some(C1)), (P2, Some(C3))])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let err = cast_ballot(&fx.store, &fx.clock, "alice", "missing", &[])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let late = FixedClock(voting_end() + chrono::Duration::minutes(1));
        let ballot = vec![sel(P1, Some(C1)), sel(P2, Some(C3))];
        let err = cast_ballot(&fx.store, &late, "alice", ELECTION, &ballot)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        fx.store
            .set_election_status(ELECTION, ElectionStatus::VotingClosed)
            .await
            .unwrap();
        let err = fx.cast("alice", &[(P1, Some(C1)), (P2, Some(C3))]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn failed_audit_write_rolls_back_the_ballot() {
        let fx = Fixture::two_positions().await;
        sqlx::query("DROP TABLE audit_log")
            .execute(fx.store.pool())
            .await
            .unwrap();
        let err = fx.cast("alice", &[(P1, Some(C1)), (P2, Some(C3))]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.public_message(), "Internal server error");
        assert_eq!(fx.vote_rows().await, 0);
        assert_eq!(fx.ballot_rows().await, 0);
    }

    #[test]
    fn election_without_positions_takes_no_ballots() {
        let err = validate_selections(&[], &[], &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }

    #[test]
    fn selections_come_back_in_position_order() {
        let positions = vec![position("p-a", 1), position("p-b", 2)];
        let sels = vec![sel("p-b", None), sel("p-a", None)];
        let ordered = validate_selections(&positions, &[], &sels).unwrap();
        assert_eq!(ordered[0].position_id, "p-a");
        assert_eq!(ordered[1].position_id, "p-b");
    }

    #[test]
    fn tokens_and_ids_are_fresh() {
        let tokens: HashSet<String> = (0..100).map(|_| new_token()).collect();
        assert_eq!(tokens.len(), 100);
        assert!(new_id("vote").starts_with("vote_"));
    }
}
