//! Presentation of results for anonymous elections.
//!
//! Anonymity only changes what is shown. The counts are the same for everyone, and while an
//! election is anonymous every requester sees candidates under positional labels. Admins
//! are told they can lift the flag, they do not get a different view.

use log::debug;

use crate::config::*;

/// "Candidate A" to "Candidate Z" for the first 26 places, then "Candidate 27", "Candidate 28"
/// and so on.
pub fn anonymous_label(rank_index: usize) -> String {
    if rank_index < 26 {
        format!("Candidate {}", (b'A' + rank_index as u8) as char)
    } else {
        format!("Candidate {}", rank_index + 1)
    }
}

fn mask(idx: usize, c: CandidateResult) -> CandidateResult {
    CandidateResult {
        name: anonymous_label(idx),
        member_id: None,
        email: None,
        image: None,
        bio: None,
        qualifications: None,
        ..c
    }
}

/// Shapes a report for display. `is_anonymous` is the flag stored on the election at request
/// time; `is_admin` only sets `can_reveal`.
pub fn project(report: TallyReport, is_anonymous: bool, is_admin: bool) -> DisplayReport {
    debug!(
        "project: election {} anonymous {} admin {}",
        report.election.id, is_anonymous, is_admin
    );
    let results = if is_anonymous {
        report
            .positions
            .into_iter()
            .map(|p| PositionResult {
                candidates: p
                    .candidates
                    .into_iter()
                    .enumerate()
                    .map(|(idx, c)| mask(idx, c))
                    .collect(),
                ..p
            })
            .collect()
    } else {
        report.positions
    };
    DisplayReport {
        election: report.election,
        anonymity: Anonymity {
            is_enabled: is_anonymous,
            can_reveal: is_admin,
            is_revealed: !is_anonymous,
        },
        results,
        summary: report.summary,
        branch_breakdown: report.branch_breakdown,
    }
}
