use crate::portal::*;

use serde::Deserialize;

/// Records owned by the membership and election management side of the portal, loaded in
/// bulk. See the manual of ballot_engine for an example file.
#[derive(Eq, PartialEq, Debug, Clone, Default, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub branches: Vec<Branch>,
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub elections: Vec<Election>,
    #[serde(default)]
    pub positions: Vec<Position>,
    /// Listing order on the ballot follows the order in the file.
    #[serde(default)]
    pub candidates: Vec<CandidateRecord>,
}

pub fn read_fixture(path: &str) -> PortalResult<Fixture> {
    let contents = fs::read_to_string(path).context(OpeningJsonSnafu { path })?;
    let fixture: Fixture = serde_json::from_str(&contents).context(ParsingJsonSnafu {})?;
    debug!("read_fixture: {:?}", fixture);
    Ok(fixture)
}

/// Inserts the fixture, parents before children.
pub async fn seed(store: &Store, fixture: &Fixture) -> PortalResult<()> {
    for b in fixture.branches.iter() {
        store.insert_branch(b).await.context(EngineSnafu)?;
    }
    for m in fixture.members.iter() {
        store.insert_member(m).await.context(EngineSnafu)?;
    }
    for e in fixture.elections.iter() {
        store.insert_election(e).await.context(EngineSnafu)?;
    }
    for p in fixture.positions.iter() {
        store.insert_position(p).await.context(EngineSnafu)?;
    }
    for c in fixture.candidates.iter() {
        store.insert_candidate(c).await.context(EngineSnafu)?;
    }
    info!(
        "seed: {} branches, {} members, {} elections, {} positions, {} candidates",
        fixture.branches.len(),
        fixture.members.len(),
        fixture.elections.len(),
        fixture.positions.len(),
        fixture.candidates.len()
    );
    Ok(())
}
