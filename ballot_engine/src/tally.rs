//! Live single-choice tally.
//!
//! Results are recomputed from the stored votes on every call. Nothing is cached, so two
//! polls on unchanged data give identical reports and a newly committed ballot shows up on
//! the next poll.

use std::collections::{BTreeMap, HashMap, HashSet};

use log::{debug, info};
use snafu::prelude::*;

use crate::config::*;
use crate::store::{self, Store};

pub const UNASSIGNED_BRANCH_ID: &str = "unassigned";
pub const UNASSIGNED_BRANCH_NAME: &str = "Unassigned";

/// Loads the election and its votes and tabulates them.
pub async fn compute_results(store: &Store, election_id: &str) -> EngineResult<TallyReport> {
    let mut conn = store.pool().acquire().await.context(StorageSnafu)?;
    let election = store::fetch_election(&mut conn, election_id)
        .await?
        .context(ElectionNotFoundSnafu { election_id })?;
    let positions = store::fetch_positions(&mut conn, election_id).await?;
    let candidates = store::fetch_approved_candidates(&mut conn, election_id).await?;
    let votes = store::fetch_cast_votes(&mut conn, election_id).await?;
    let electorate = store::fetch_electorate(&mut conn).await?;
    info!(
        "compute_results: election {}: {} positions, {} candidates, {} vote rows",
        election_id,
        positions.len(),
        candidates.len(),
        votes.len()
    );
    Ok(tabulate(
        &election,
        &positions,
        &candidates,
        &votes,
        &electorate,
    ))
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Share of `num` in `den`, in percent with two decimals. Zero when `den` is zero.
pub fn percent(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        round2(num as f64 / den as f64 * 100.0)
    }
}

#[derive(Debug, Clone)]
struct BranchKey {
    id: String,
    name: String,
}

fn branch_of(branch_id: &Option<String>, branch_name: &Option<String>) -> BranchKey {
    match branch_id {
        Some(id) => BranchKey {
            id: id.clone(),
            name: branch_name.clone().unwrap_or_else(|| id.clone()),
        },
        None => BranchKey {
            id: UNASSIGNED_BRANCH_ID.to_string(),
            name: UNASSIGNED_BRANCH_NAME.to_string(),
        },
    }
}

/// Vote and voter counts for one branch.
#[derive(Debug, Default)]
struct BranchCounter {
    votes: u64,
    active_votes: u64,
}

/// Pure tabulation over already loaded rows.
///
/// Only votes for candidates in `candidates` (the approved ones) are counted. Participation
/// rates use currently active members on both sides of the ratio: a member who voted and was
/// deactivated afterwards still contributes their votes but no longer counts as a
/// participant.
pub fn tabulate(
    election: &Election,
    positions: &[Position],
    candidates: &[Candidate],
    votes: &[CastVote],
    electorate: &[BranchElectorate],
) -> TallyReport {
    let mut branch_names: BTreeMap<String, String> = BTreeMap::new();
    let mut branch_active: HashMap<String, u64> = HashMap::new();
    for be in electorate.iter() {
        let key = branch_of(&be.branch_id, &be.branch_name);
        *branch_active.entry(key.id.clone()).or_insert(0) += be.active_members;
        branch_names.entry(key.id).or_insert(key.name);
    }
    let total_active: u64 = branch_active.values().sum();

    let tallied: HashSet<(&str, &str)> = candidates
        .iter()
        .map(|c| (c.position_id.as_str(), c.id.as_str()))
        .collect();

    let mut position_results = Vec::with_capacity(positions.len());
    for p in positions.iter() {
        let pos_votes: Vec<&CastVote> =
            votes.iter().filter(|v| v.position_id == p.id).collect();
        let counted: Vec<&CastVote> = pos_votes
            .iter()
            .filter(|v| match v.candidate_id.as_deref() {
                Some(cid) => tallied.contains(&(p.id.as_str(), cid)),
                None => false,
            })
            .cloned()
            .collect();
        let abstentions = pos_votes.iter().filter(|v| v.candidate_id.is_none()).count() as u64;
        let position_total = counted.len() as u64;
        let active_voters = counted.iter().filter(|v| v.member_active).count() as u64;

        let mut results: Vec<CandidateResult> = candidates
            .iter()
            .filter(|c| c.position_id == p.id)
            .map(|c| {
                let mine: Vec<&&CastVote> = counted
                    .iter()
                    .filter(|v| v.candidate_id.as_deref() == Some(c.id.as_str()))
                    .collect();
                let mut per_branch: BTreeMap<String, BranchCounter> = BTreeMap::new();
                for v in mine.iter() {
                    let key = branch_of(&v.branch_id, &v.branch_name);
                    branch_names.entry(key.id.clone()).or_insert(key.name);
                    let counter = per_branch.entry(key.id).or_default();
                    counter.votes += 1;
                    if v.member_active {
                        counter.active_votes += 1;
                    }
                }
                let mut branch_breakdown: Vec<BranchVotes> = per_branch
                    .into_iter()
                    .map(|(id, counter)| BranchVotes {
                        branch_name: branch_names.get(&id).cloned().unwrap_or_else(|| id.clone()),
                        participation_rate: percent(
                            counter.active_votes,
                            branch_active.get(&id).cloned().unwrap_or(0),
                        ),
                        votes: counter.votes,
                        branch_id: id,
                    })
                    .collect();
                branch_breakdown.sort_by(|a, b| {
                    b.votes
                        .cmp(&a.votes)
                        .then_with(|| a.branch_name.cmp(&b.branch_name))
                });
                let vote_count = mine.len() as u64;
                CandidateResult {
                    candidate_id: c.id.clone(),
                    member_id: Some(c.member_id.clone()),
                    name: c.name.clone(),
                    email: c.email.clone(),
                    image: c.image.clone(),
                    bio: c.bio.clone(),
                    qualifications: c.qualifications.clone(),
                    vote_count,
                    percentage: percent(vote_count, position_total),
                    rank: 0,
                    branch_breakdown,
                }
            })
            .collect();

        // Stable: equal counts keep the listing order.
        results.sort_by(|a, b| b.vote_count.cmp(&a.vote_count));
        for (idx, r) in results.iter_mut().enumerate() {
            r.rank = (idx + 1) as u32;
        }
        debug!(
            "tabulate: position {}: total {} abstentions {} ranking {:?}",
            p.id,
            position_total,
            abstentions,
            results
                .iter()
                .map(|r| (r.candidate_id.as_str(), r.vote_count))
                .collect::<Vec<_>>()
        );

        position_results.push(PositionResult {
            position_id: p.id.clone(),
            title: p.title.clone(),
            description: p.description.clone(),
            order: p.order,
            total_votes: position_total,
            abstentions,
            total_eligible_members: total_active,
            participation_rate: percent(active_voters, total_active),
            candidates: results,
        });
    }

    // Election-wide and per-branch roll-ups.
    let known_positions: HashSet<&str> = positions.iter().map(|p| p.id.as_str()).collect();
    let mut voters: HashSet<&str> = HashSet::new();
    let mut active_voters: HashSet<&str> = HashSet::new();
    let mut branch_voters: HashMap<String, HashSet<&str>> = HashMap::new();
    let mut branch_active_voters: HashMap<String, HashSet<&str>> = HashMap::new();
    let mut branch_votes: HashMap<String, u64> = HashMap::new();
    for v in votes.iter() {
        if !known_positions.contains(v.position_id.as_str()) {
            continue;
        }
        let key = branch_of(&v.branch_id, &v.branch_name);
        branch_names.entry(key.id.clone()).or_insert(key.name);
        voters.insert(v.member_id.as_str());
        branch_voters
            .entry(key.id.clone())
            .or_default()
            .insert(v.member_id.as_str());
        if v.member_active {
            active_voters.insert(v.member_id.as_str());
            branch_active_voters
                .entry(key.id.clone())
                .or_default()
                .insert(v.member_id.as_str());
        }
        if let Some(cid) = v.candidate_id.as_deref() {
            if tallied.contains(&(v.position_id.as_str(), cid)) {
                *branch_votes.entry(key.id).or_insert(0) += 1;
            }
        }
    }

    let mut branch_breakdown: Vec<BranchRollup> = branch_names
        .iter()
        .filter_map(|(id, name)| {
            let eligible = branch_active.get(id).cloned().unwrap_or(0);
            let total_votes = branch_votes.get(id).cloned().unwrap_or(0);
            let seen = branch_voters.get(id).map(|s| s.len()).unwrap_or(0) as u64;
            let active = branch_active_voters.get(id).map(|s| s.len()).unwrap_or(0) as u64;
            // The sentinel branch only shows up when someone is in it.
            if id == UNASSIGNED_BRANCH_ID && eligible == 0 && seen == 0 {
                return None;
            }
            Some(BranchRollup {
                branch_id: id.clone(),
                branch_name: name.clone(),
                total_votes,
                voters: seen,
                eligible_members: eligible,
                participation_rate: percent(active, eligible),
            })
        })
        .collect();
    branch_breakdown.sort_by(|a, b| {
        b.total_votes
            .cmp(&a.total_votes)
            .then_with(|| a.branch_name.cmp(&b.branch_name))
            .then_with(|| a.branch_id.cmp(&b.branch_id))
    });

    let summary = TallySummary {
        total_positions: positions.len() as u64,
        total_candidates: position_results
            .iter()
            .map(|p| p.candidates.len() as u64)
            .sum(),
        total_votes: position_results.iter().map(|p| p.total_votes).sum(),
        total_voters: voters.len() as u64,
        total_eligible_members: total_active,
        participation_rate: percent(active_voters.len() as u64, total_active),
    };

    TallyReport {
        election: ElectionHeader::from(election),
        positions: position_results,
        summary,
        branch_breakdown,
    }
}
