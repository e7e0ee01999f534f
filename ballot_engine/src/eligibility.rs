//! The eligibility gate: may this member cast a ballot in this election right now?

use chrono::{DateTime, Utc};
use log::debug;
use snafu::prelude::*;
use sqlx::sqlite::SqliteConnection;

use crate::config::*;
use crate::store::{self, Store};

/// Runs the four checks in order: member standing, election status, voting window, and
/// absence of a previous ballot.
pub async fn authorize(
    store: &Store,
    clock: &dyn Clock,
    member_id: &str,
    election_id: &str,
) -> EngineResult<Eligibility> {
    let mut conn = store.pool().acquire().await.context(StorageSnafu)?;
    let election = store::fetch_election(&mut conn, election_id).await?;
    let denial = match check_standing(&mut conn, member_id, election.as_ref(), clock.now()).await? {
        Some(d) => Some(d),
        None => check_not_voted(&mut conn, member_id, election_id).await?,
    };
    debug!(
        "authorize: member {} election {}: {:?}",
        member_id, election_id, denial
    );
    Ok(match denial {
        Some(d) => Eligibility::Denied(d),
        None => Eligibility::Allowed,
    })
}

/// Checks 1 to 3: the member is active, the election accepts ballots and `now` falls in
/// its voting window.
pub(crate) async fn check_standing(
    conn: &mut SqliteConnection,
    member_id: &str,
    election: Option<&Election>,
    now: DateTime<Utc>,
) -> EngineResult<Option<Denial>> {
    let member = store::fetch_member(conn, member_id).await?;
    if !matches!(member, Some(Member { status: MemberStatus::Active, .. })) {
        return Ok(Some(Denial::MemberNotActive));
    }
    let election = match election {
        Some(e) if e.status == ElectionStatus::VotingActive => e,
        _ => return Ok(Some(Denial::ElectionNotOpen)),
    };
    if !election.window_contains(now) {
        return Ok(Some(Denial::OutsideWindow));
    }
    Ok(None)
}

/// Check 4.
pub(crate) async fn check_not_voted(
    conn: &mut SqliteConnection,
    member_id: &str,
    election_id: &str,
) -> EngineResult<Option<Denial>> {
    if store::has_ballot(conn, member_id, election_id).await? {
        Ok(Some(Denial::AlreadyVoted))
    } else {
        Ok(None)
    }
}

/// Voting elections open right now, annotated for the given member.
pub async fn eligible_elections(
    store: &Store,
    clock: &dyn Clock,
    member_id: &str,
) -> EngineResult<Vec<EligibleElection>> {
    let now = clock.now();
    let mut conn = store.pool().acquire().await.context(StorageSnafu)?;
    let member_active = matches!(
        store::fetch_member(&mut conn, member_id).await?,
        Some(Member {
            status: MemberStatus::Active,
            ..
        })
    );
    let voted = store::fetch_voted_elections(&mut conn, member_id).await?;
    let mut res = Vec::new();
    for e in store::fetch_voting_elections(&mut conn).await? {
        if !e.window_contains(now) {
            continue;
        }
        let positions = store::count_positions(&mut conn, &e.id).await?;
        let has_voted = voted.contains(&e.id);
        res.push(EligibleElection {
            can_vote: member_active && !has_voted,
            has_voted,
            positions,
            id: e.id,
            title: e.title,
            description: e.description,
            voting_start: e.voting_start,
            voting_end: e.voting_end,
        });
    }
    Ok(res)
}

/// Kiosk sessions are refused up front once the member has voted in every election that is
/// currently accepting ballots. The voting window is not consulted here; the per-election
/// gate still runs when a ballot is cast.
pub async fn kiosk_login(store: &Store, member_id: &str) -> EngineResult<KioskLogin> {
    let mut conn = store.pool().acquire().await.context(StorageSnafu)?;
    let member = store::fetch_member(&mut conn, member_id).await?;
    ensure!(
        matches!(
            member,
            Some(Member {
                status: MemberStatus::Active,
                ..
            })
        ),
        IneligibleSnafu {
            denial: Denial::MemberNotActive
        }
    );

    let voted = store::fetch_voted_elections(&mut conn, member_id).await?;
    let active = store::fetch_voting_elections(&mut conn).await?;
    let pending: Vec<String> = active
        .iter()
        .filter(|e| !voted.contains(&e.id))
        .map(|e| e.id.clone())
        .collect();
    debug!(
        "kiosk_login: member {}: {} active elections, {} pending",
        member_id,
        active.len(),
        pending.len()
    );
    ensure!(
        active.is_empty() || !pending.is_empty(),
        IneligibleSnafu {
            denial: Denial::AlreadyVoted
        }
    );
    Ok(KioskLogin {
        member_id: member_id.to_string(),
        pending_elections: pending,
    })
}
