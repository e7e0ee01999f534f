use log::{debug, info, warn};

use ballot_engine::builder::Builder;
use ballot_engine::*;
use snafu::{prelude::*, Snafu};

use std::fs;

use serde::Deserialize;
use serde_json::json;
use serde_json::Value as JSValue;
use text_diff::print_diff;

pub mod config_reader;
pub mod fixture;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PortalError {
    #[snafu(display("Error opening file {path}"))]
    OpeningJson {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error parsing JSON: {source}"))]
    ParsingJson { source: serde_json::Error },

    #[snafu(display("{source}"))]
    Engine { source: EngineError },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

pub type PortalResult<T> = Result<T, PortalError>;

/// What a handler sends back: an HTTP status code and a JSON body.
#[derive(PartialEq, Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub body: JSValue,
}

impl Response {
    fn new(status: u16, body: JSValue) -> Response {
        Response { status, body }
    }

    fn failure(kind: ErrorKind, message: &str) -> Response {
        Response::new(kind.status_code(), json!({ "error": message }))
    }

    fn from_error(e: &EngineError) -> Response {
        if e.kind() == ErrorKind::Internal {
            warn!("Internal failure: {}", e);
        } else {
            debug!("Request refused: {}", e);
        }
        Response::failure(e.kind(), &e.public_message())
    }

    fn serialized<T: serde::Serialize>(status: u16, value: &T) -> Response {
        match serde_json::to_value(value) {
            Ok(body) => Response::new(status, body),
            Err(e) => {
                warn!("Could not serialize response: {}", e);
                Response::failure(ErrorKind::Internal, "Internal server error")
            }
        }
    }

    pub fn is_success(&self) -> bool {
        self.status < 400
    }
}

fn unauthorized() -> Response {
    Response::failure(ErrorKind::Unauthorized, "Authentication required")
}

/// Resolves the session of a member, the way the identity provider would. Unknown members
/// have no session.
pub async fn lookup_session(store: &Store, member_id: &str) -> PortalResult<Option<Session>> {
    let member = store.member(member_id).await.context(EngineSnafu)?;
    Ok(member.map(|m| Session {
        member_id: m.id,
        role: m.role,
    }))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CastRequest {
    election_id: String,
    votes: Vec<Selection>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnonymityRequest {
    is_anonymous: bool,
}

/// Cast ballot: `{ electionId, votes: [{ positionId, candidateId }] }`.
pub async fn cast_ballot(engine: &Engine, session: Option<&Session>, body: &str) -> Response {
    let session = match session {
        Some(s) => s,
        None => return unauthorized(),
    };
    let request: CastRequest = match serde_json::from_str(body) {
        Ok(r) => r,
        Err(e) => {
            return Response::failure(
                ErrorKind::ValidationError,
                &format!("Invalid ballot: {}", e),
            )
        }
    };
    let mut builder = Builder::new();
    for sel in request.votes.iter() {
        if let Err(e) = builder.add_selection(sel) {
            return Response::from_error(&e);
        }
    }
    match engine
        .cast_ballot(session, &request.election_id, &builder.build())
        .await
    {
        Ok(receipt) => Response::new(
            201,
            json!({
                "success": true,
                "votesCount": receipt.votes.len(),
                "votes": receipt.votes,
            }),
        ),
        Err(e) => Response::from_error(&e),
    }
}

/// Results, with no authentication required. The session only decides `canReveal`.
pub async fn results(engine: &Engine, session: Option<&Session>, election_id: &str) -> Response {
    match engine.results(election_id, session).await {
        Ok(report) => Response::serialized(200, &report),
        Err(e) => Response::from_error(&e),
    }
}

pub async fn eligible_elections(engine: &Engine, session: Option<&Session>) -> Response {
    let session = match session {
        Some(s) => s,
        None => return unauthorized(),
    };
    match engine.eligible_elections(session).await {
        Ok(elections) => Response::serialized(200, &json!({ "elections": elections })),
        Err(e) => Response::from_error(&e),
    }
}

pub async fn kiosk_login(engine: &Engine, member_id: &str) -> Response {
    match engine.kiosk_login(member_id).await {
        Ok(login) => Response::serialized(200, &login),
        Err(e) => Response::from_error(&e),
    }
}

/// Set anonymity: `{ isAnonymous }`. Admins only.
pub async fn set_anonymity(
    engine: &Engine,
    session: Option<&Session>,
    election_id: &str,
    body: &str,
) -> Response {
    let session = match session {
        Some(s) => s,
        None => return unauthorized(),
    };
    let request: AnonymityRequest = match serde_json::from_str(body) {
        Ok(r) => r,
        Err(e) => {
            return Response::failure(
                ErrorKind::ValidationError,
                &format!("Invalid request: {}", e),
            )
        }
    };
    match engine
        .set_anonymity(session, election_id, request.is_anonymous)
        .await
    {
        Ok(()) => Response::new(
            200,
            json!({ "electionId": election_id, "isAnonymous": request.is_anonymous }),
        ),
        Err(e) => Response::from_error(&e),
    }
}

pub fn render(response: &Response) -> PortalResult<String> {
    serde_json::to_string_pretty(&response.body).context(ParsingJsonSnafu {})
}

/// Compares rendered output with the JSON stored at `path`, printing a diff if they differ.
pub fn check_reference(path: &str, rendered: &str) -> PortalResult<()> {
    let contents = fs::read_to_string(path).context(OpeningJsonSnafu { path })?;
    let reference: JSValue = serde_json::from_str(&contents).context(ParsingJsonSnafu {})?;
    let pretty_reference = serde_json::to_string_pretty(&reference).context(ParsingJsonSnafu {})?;
    if pretty_reference != rendered {
        warn!("Found differences with the reference {}", path);
        print_diff(pretty_reference.as_str(), rendered, "\n");
        whatever!("Difference detected between the results and the reference")
    }
    info!("Results match the reference {}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::fixture::*;
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    const FIXTURE: &str = r#"{
        "branches": [{"id": "north", "name": "North"}],
        "members": [
            {"id": "alice", "name": "Alice Martin", "email": "alice@coop.example",
             "status": "ACTIVE", "branchId": "north", "role": "MEMBER"},
            {"id": "bob", "name": "Bob Durand", "email": null,
             "status": "ACTIVE", "branchId": null, "role": "MEMBER"},
            {"id": "root", "name": "Election Officer", "email": null,
             "status": "ACTIVE", "branchId": null, "role": "ADMIN"}
        ],
        "elections": [
            {"id": "e1", "title": "Board 2026", "description": null, "status": "VOTING_ACTIVE",
             "voteType": "SINGLE_CHOICE", "votingStart": "2026-03-01T08:00:00Z",
             "votingEnd": "2026-03-03T20:00:00Z", "isAnonymous": false}
        ],
        "positions": [
            {"id": "chair", "electionId": "e1", "title": "Chair", "description": null, "order": 1}
        ],
        "candidates": [
            {"id": "c-alice", "electionId": "e1", "positionId": "chair", "memberId": "alice",
             "status": "approved", "image": null, "bio": "Ten years on the board",
             "qualifications": null},
            {"id": "c-bob", "electionId": "e1", "positionId": "chair", "memberId": "bob",
             "status": "approved", "image": null, "bio": null, "qualifications": null}
        ]
    }"#;

    async fn engine() -> Engine {
        let _ = env_logger::builder().is_test(true).try_init();
        let store = Store::in_memory().await.unwrap();
        store.init_schema().await.unwrap();
        let fixture: Fixture = serde_json::from_str(FIXTURE).unwrap();
        seed(&store, &fixture).await.unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
        Engine::with_clock(store, Arc::new(FixedClock(now)))
    }

    async fn session(engine: &Engine, member_id: &str) -> Option<Session> {
        lookup_session(engine.store(), member_id).await.unwrap()
    }

    #[tokio::test]
    async fn cast_then_results() {
        let engine = engine().await;
        let alice = session(&engine, "alice").await;
        let body = r#"{"electionId": "e1", "votes": [{"positionId": "chair", "candidateId": "c-bob"}]}"#;

        let r = cast_ballot(&engine, alice.as_ref(), body).await;
        assert_eq!(r.status, 201);
        assert_eq!(r.body["success"], true);
        assert_eq!(r.body["votesCount"], 1);
        assert!(r.body["votes"][0]["voteToken"].is_string());

        let again = cast_ballot(&engine, alice.as_ref(), body).await;
        assert_eq!(again.status, 400);
        assert_eq!(again.body["error"], "You have already voted in this election");

        let r = results(&engine, None, "e1").await;
        assert_eq!(r.status, 200);
        let chair = &r.body["results"][0];
        assert_eq!(chair["totalVotes"], 1);
        assert_eq!(chair["candidates"][0]["candidateId"], "c-bob");
        assert_eq!(chair["candidates"][0]["percentage"], 100.0);
        assert_eq!(r.body["anonymity"]["canReveal"], false);
        assert_eq!(r.body["summary"]["totalVoters"], 1);
        assert!(r.body["branchBreakdown"].is_array());
    }

    #[tokio::test]
    async fn requests_without_session_or_with_bad_bodies() {
        let engine = engine().await;
        let r = cast_ballot(&engine, None, "{}").await;
        assert_eq!(r.status, 401);
        assert_eq!(eligible_elections(&engine, None).await.status, 401);
        assert!(session(&engine, "nobody").await.is_none());

        let alice = session(&engine, "alice").await;
        let r = cast_ballot(&engine, alice.as_ref(), "not json").await;
        assert_eq!(r.status, 400);
        let twice = r#"{"electionId": "e1", "votes": [
            {"positionId": "chair", "candidateId": "c-bob"},
            {"positionId": "chair", "candidateId": null}]}"#;
        let r = cast_ballot(&engine, alice.as_ref(), twice).await;
        assert_eq!(r.status, 400);
        let missing = r#"{"electionId": "e9", "votes": []}"#;
        assert_eq!(cast_ballot(&engine, alice.as_ref(), missing).await.status, 404);
        assert_eq!(results(&engine, None, "e9").await.status, 404);
    }

    #[tokio::test]
    async fn anonymity_is_admin_only_and_applies_immediately() {
        let engine = engine().await;
        let alice = session(&engine, "alice").await;
        let root = session(&engine, "root").await;
        let on = r#"{"isAnonymous": true}"#;

        let r = set_anonymity(&engine, alice.as_ref(), "e1", on).await;
        assert_eq!(r.status, 403);
        let r = set_anonymity(&engine, root.as_ref(), "e1", on).await;
        assert_eq!(r.status, 200);
        assert_eq!(r.body, json!({"electionId": "e1", "isAnonymous": true}));

        let r = results(&engine, root.as_ref(), "e1").await;
        assert_eq!(r.body["anonymity"]["isEnabled"], true);
        assert_eq!(r.body["anonymity"]["canReveal"], true);
        let first = &r.body["results"][0]["candidates"][0];
        assert_eq!(first["name"], "Candidate A");
        assert!(first["email"].is_null());
        assert!(first["bio"].is_null());
    }

    #[tokio::test]
    async fn eligible_elections_and_kiosk() {
        let engine = engine().await;
        let bob = session(&engine, "bob").await;
        let r = eligible_elections(&engine, bob.as_ref()).await;
        assert_eq!(r.status, 200);
        assert_eq!(r.body["elections"][0]["id"], "e1");
        assert_eq!(r.body["elections"][0]["canVote"], true);

        let r = kiosk_login(&engine, "bob").await;
        assert_eq!(r.body["pendingElections"], json!(["e1"]));
        let body = r#"{"electionId": "e1", "votes": [{"positionId": "chair"}]}"#;
        assert_eq!(cast_ballot(&engine, bob.as_ref(), body).await.status, 201);
        let r = kiosk_login(&engine, "bob").await;
        assert_eq!(r.status, 400);
    }

    #[tokio::test]
    async fn reference_comparison() {
        let engine = engine().await;
        let rendered = render(&results(&engine, None, "e1").await).unwrap();
        let path = std::env::temp_dir().join(format!("coopvote-ref-{}.json", std::process::id()));
        let path = path.to_str().unwrap().to_string();
        fs::write(&path, &rendered).unwrap();
        check_reference(&path, &rendered).unwrap();
        assert!(check_reference(&path, "{}").is_err());
        fs::remove_file(&path).unwrap();
    }
}
