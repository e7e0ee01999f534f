/*!
Ballot casting and live tallying for cooperative elections.

Every eligible member casts exactly one complete ballot per election: one line per position,
either a vote for an approved candidate or an abstention. Results are recomputed from the
stored votes on each request, ranked, broken down per branch and, when the election is
anonymous, shown under positional labels.

```no_run
use ballot_engine::{Engine, Session, Role, Store};
use ballot_engine::builder::Builder;
# async fn run() -> Result<(), ballot_engine::EngineError> {
let store = Store::connect("sqlite://portal.db", 5).await?;
store.init_schema().await?;
let engine = Engine::new(store);

let session = Session { member_id: "alice".to_string(), role: Role::Member };
let mut ballot = Builder::new();
ballot.choose("pos-chair", "cand-bob")?;
ballot.abstain("pos-treasurer")?;
let receipt = engine.cast_ballot(&session, "election-2026", &ballot.build()).await?;
println!("{} votes recorded", receipt.votes.len());

let report = engine.results("election-2026", None).await?;
println!("{}", report.summary.participation_rate);
# Ok(())
# }
```

See [`manual`] for the command line tool and the data formats.
*/

mod config;
mod engine;

pub mod anonymity;
pub mod builder;
pub mod casting;
pub mod eligibility;
pub mod manual;
pub mod store;
pub mod tally;

#[cfg(test)]
pub(crate) mod testing;

pub use crate::config::*;
pub use crate::engine::Engine;
pub use crate::store::Store;
