use std::sync::Arc;

use log::info;
use snafu::prelude::*;

use crate::anonymity;
use crate::casting;
use crate::config::*;
use crate::eligibility;
use crate::store::Store;
use crate::tally;

/// Entry point for the portal: the store and the clock, shared by every request.
///
/// Cloning is cheap. The engine keeps no state of its own between calls; everything is read
/// from and written to the store.
#[derive(Clone)]
pub struct Engine {
    store: Store,
    clock: Arc<dyn Clock>,
}

impl Engine {
    pub fn new(store: Store) -> Engine {
        Engine::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Store, clock: Arc<dyn Clock>) -> Engine {
        Engine { store, clock }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub async fn authorize(&self, member_id: &str, election_id: &str) -> EngineResult<Eligibility> {
        eligibility::authorize(&self.store, self.clock.as_ref(), member_id, election_id).await
    }

    /// Casts the ballot of the session's member.
    pub async fn cast_ballot(
        &self,
        session: &Session,
        election_id: &str,
        selections: &[Selection],
    ) -> EngineResult<BallotReceipt> {
        casting::cast_ballot(
            &self.store,
            self.clock.as_ref(),
            &session.member_id,
            election_id,
            selections,
        )
        .await
    }

    /// Raw tally with full candidate identities.
    pub async fn compute_results(&self, election_id: &str) -> EngineResult<TallyReport> {
        tally::compute_results(&self.store, election_id).await
    }

    /// The tally as the requester may see it. The anonymity flag is the one stored on the
    /// election at the time of this call.
    pub async fn results(
        &self,
        election_id: &str,
        requester: Option<&Session>,
    ) -> EngineResult<DisplayReport> {
        let report = tally::compute_results(&self.store, election_id).await?;
        let is_anonymous = report.election.is_anonymous;
        let is_admin = requester.map(|s| s.is_admin()).unwrap_or(false);
        Ok(anonymity::project(report, is_anonymous, is_admin))
    }

    pub async fn eligible_elections(&self, session: &Session) -> EngineResult<Vec<EligibleElection>> {
        eligibility::eligible_elections(&self.store, self.clock.as_ref(), &session.member_id)
            .await
    }

    pub async fn kiosk_login(&self, member_id: &str) -> EngineResult<KioskLogin> {
        eligibility::kiosk_login(&self.store, member_id).await
    }

    /// Turns result anonymity on or off. Admins only.
    pub async fn set_anonymity(
        &self,
        session: &Session,
        election_id: &str,
        is_anonymous: bool,
    ) -> EngineResult<()> {
        ensure!(
            session.is_admin(),
            ForbiddenSnafu {
                message: "Only administrators can change result anonymity"
            }
        );
        let found = self
            .store
            .set_election_anonymity(election_id, is_anonymous)
            .await?;
        ensure!(found, ElectionNotFoundSnafu { election_id });
        info!(
            "set_anonymity: {} set election {} anonymous={}",
            session.member_id, election_id, is_anonymous
        );
        Ok(())
    }
}
