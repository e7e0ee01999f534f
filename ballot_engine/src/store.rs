//! SQLite persistence.
//!
//! The [`Store`] wraps a connection pool that is built once at process start and handed to
//! every service. Read helpers take a `&mut SqliteConnection` so that the same code runs on a
//! pooled connection or inside the casting transaction.

use std::collections::HashSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use log::{debug, info};
use snafu::prelude::*;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;

use crate::config::*;

/// Statements creating the schema. Safe to run on an existing database.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS branch (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS member (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        email TEXT,
        status TEXT NOT NULL,
        branch_id TEXT REFERENCES branch (id),
        role TEXT NOT NULL DEFAULT 'MEMBER'
    )",
    "CREATE TABLE IF NOT EXISTS election (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        description TEXT,
        status TEXT NOT NULL,
        vote_type TEXT NOT NULL DEFAULT 'SINGLE_CHOICE',
        voting_start TEXT NOT NULL,
        voting_end TEXT NOT NULL,
        is_anonymous BOOLEAN NOT NULL DEFAULT FALSE
    )",
    "CREATE TABLE IF NOT EXISTS position (
        id TEXT PRIMARY KEY,
        election_id TEXT NOT NULL REFERENCES election (id),
        title TEXT NOT NULL,
        description TEXT,
        sort_order INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS candidate (
        id TEXT PRIMARY KEY,
        election_id TEXT NOT NULL REFERENCES election (id),
        position_id TEXT NOT NULL REFERENCES position (id),
        member_id TEXT NOT NULL REFERENCES member (id),
        status TEXT NOT NULL,
        image TEXT,
        bio TEXT,
        qualifications TEXT
    )",
    // One row per member and election. The unique constraint is what makes a ballot
    // exactly-once; everything else only rejects duplicates early.
    "CREATE TABLE IF NOT EXISTS ballot (
        id TEXT PRIMARY KEY,
        election_id TEXT NOT NULL REFERENCES election (id),
        member_id TEXT NOT NULL REFERENCES member (id),
        cast_at TEXT NOT NULL,
        UNIQUE (member_id, election_id)
    )",
    "CREATE TABLE IF NOT EXISTS vote (
        id TEXT PRIMARY KEY,
        ballot_id TEXT NOT NULL REFERENCES ballot (id),
        election_id TEXT NOT NULL REFERENCES election (id),
        position_id TEXT NOT NULL REFERENCES position (id),
        candidate_id TEXT REFERENCES candidate (id),
        member_id TEXT NOT NULL REFERENCES member (id),
        vote_token TEXT NOT NULL UNIQUE,
        created_at TEXT NOT NULL,
        UNIQUE (member_id, election_id, position_id)
    )",
    "CREATE INDEX IF NOT EXISTS vote_election_idx ON vote (election_id)",
    "CREATE TABLE IF NOT EXISTS audit_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        member_id TEXT NOT NULL,
        action TEXT NOT NULL,
        entity_type TEXT NOT NULL,
        entity_id TEXT NOT NULL,
        details TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
];

/// Handle on the election database.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Opens (and creates if needed) the database at `url`, e.g. `sqlite://portal.db`.
    pub async fn connect(url: &str, max_connections: u32) -> EngineResult<Store> {
        info!("Opening database {} with {} connections", url, max_connections);
        let options = SqliteConnectOptions::from_str(url)
            .context(StorageSnafu)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .context(StorageSnafu)?;
        Ok(Store { pool })
    }

    /// A private in-memory database. It lives on a single connection that is never recycled.
    pub async fn in_memory() -> EngineResult<Store> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .context(StorageSnafu)?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context(StorageSnafu)?;
        Ok(Store { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Store {
        Store { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn init_schema(&self) -> EngineResult<()> {
        for stmt in SCHEMA {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .context(StorageSnafu)?;
        }
        debug!("init_schema: {} statements applied", SCHEMA.len());
        Ok(())
    }

    // Records owned by the membership and election management collaborators.

    pub async fn insert_branch(&self, branch: &Branch) -> EngineResult<()> {
        sqlx::query("INSERT INTO branch (id, name) VALUES (?, ?)")
            .bind(&branch.id)
            .bind(&branch.name)
            .execute(&self.pool)
            .await
            .context(StorageSnafu)?;
        Ok(())
    }

    pub async fn insert_member(&self, member: &Member) -> EngineResult<()> {
        sqlx::query(
            "INSERT INTO member (id, name, email, status, branch_id, role)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&member.id)
        .bind(&member.name)
        .bind(&member.email)
        .bind(member.status.as_str())
        .bind(&member.branch_id)
        .bind(member.role.as_str())
        .execute(&self.pool)
        .await
        .context(StorageSnafu)?;
        Ok(())
    }

    pub async fn insert_election(&self, election: &Election) -> EngineResult<()> {
        sqlx::query(
            "INSERT INTO election
                (id, title, description, status, vote_type, voting_start, voting_end, is_anonymous)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&election.id)
        .bind(&election.title)
        .bind(&election.description)
        .bind(election.status.as_str())
        .bind(election.vote_type.as_str())
        .bind(election.voting_start)
        .bind(election.voting_end)
        .bind(election.is_anonymous)
        .execute(&self.pool)
        .await
        .context(StorageSnafu)?;
        Ok(())
    }

    pub async fn insert_position(&self, position: &Position) -> EngineResult<()> {
        sqlx::query(
            "INSERT INTO position (id, election_id, title, description, sort_order)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&position.id)
        .bind(&position.election_id)
        .bind(&position.title)
        .bind(&position.description)
        .bind(position.order)
        .execute(&self.pool)
        .await
        .context(StorageSnafu)?;
        Ok(())
    }

    /// Candidates are listed in the order they are inserted.
    pub async fn insert_candidate(&self, candidate: &CandidateRecord) -> EngineResult<()> {
        sqlx::query(
            "INSERT INTO candidate
                (id, election_id, position_id, member_id, status, image, bio, qualifications)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&candidate.id)
        .bind(&candidate.election_id)
        .bind(&candidate.position_id)
        .bind(&candidate.member_id)
        .bind(candidate.status.as_str())
        .bind(&candidate.image)
        .bind(&candidate.bio)
        .bind(&candidate.qualifications)
        .execute(&self.pool)
        .await
        .context(StorageSnafu)?;
        Ok(())
    }

    /// Returns false if the election does not exist.
    pub async fn set_election_anonymity(
        &self,
        election_id: &str,
        is_anonymous: bool,
    ) -> EngineResult<bool> {
        let r = sqlx::query("UPDATE election SET is_anonymous = ? WHERE id = ?")
            .bind(is_anonymous)
            .bind(election_id)
            .execute(&self.pool)
            .await
            .context(StorageSnafu)?;
        Ok(r.rows_affected() > 0)
    }

    pub async fn set_election_status(
        &self,
        election_id: &str,
        status: ElectionStatus,
    ) -> EngineResult<bool> {
        let r = sqlx::query("UPDATE election SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(election_id)
            .execute(&self.pool)
            .await
            .context(StorageSnafu)?;
        Ok(r.rows_affected() > 0)
    }

    pub async fn set_member_status(
        &self,
        member_id: &str,
        status: MemberStatus,
    ) -> EngineResult<bool> {
        let r = sqlx::query("UPDATE member SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(member_id)
            .execute(&self.pool)
            .await
            .context(StorageSnafu)?;
        Ok(r.rows_affected() > 0)
    }

    /// The member record, used by the session provider to resolve roles.
    pub async fn member(&self, member_id: &str) -> EngineResult<Option<Member>> {
        let mut conn = self.pool.acquire().await.context(StorageSnafu)?;
        fetch_member(&mut conn, member_id).await
    }

    pub async fn audit_entries(&self, election_id: &str) -> EngineResult<Vec<AuditEntry>> {
        let mut conn = self.pool.acquire().await.context(StorageSnafu)?;
        fetch_audit_entries(&mut conn, election_id).await
    }
}

// ********* Rows **********

#[derive(FromRow)]
struct MemberRow {
    id: String,
    name: String,
    email: Option<String>,
    status: String,
    branch_id: Option<String>,
    role: String,
}

impl TryFrom<MemberRow> for Member {
    type Error = EngineError;

    fn try_from(r: MemberRow) -> EngineResult<Member> {
        Ok(Member {
            id: r.id,
            name: r.name,
            email: r.email,
            status: r.status.parse()?,
            branch_id: r.branch_id,
            role: r.role.parse()?,
        })
    }
}

#[derive(FromRow)]
struct ElectionRow {
    id: String,
    title: String,
    description: Option<String>,
    status: String,
    vote_type: String,
    voting_start: DateTime<Utc>,
    voting_end: DateTime<Utc>,
    is_anonymous: bool,
}

impl TryFrom<ElectionRow> for Election {
    type Error = EngineError;

    fn try_from(r: ElectionRow) -> EngineResult<Election> {
        Ok(Election {
            id: r.id,
            title: r.title,
            description: r.description,
            status: r.status.parse()?,
            vote_type: r.vote_type.parse()?,
            voting_start: r.voting_start,
            voting_end: r.voting_end,
            is_anonymous: r.is_anonymous,
        })
    }
}

#[derive(FromRow)]
struct PositionRow {
    id: String,
    election_id: String,
    title: String,
    description: Option<String>,
    sort_order: i64,
}

impl From<PositionRow> for Position {
    fn from(r: PositionRow) -> Position {
        Position {
            id: r.id,
            election_id: r.election_id,
            title: r.title,
            description: r.description,
            order: r.sort_order,
        }
    }
}

#[derive(FromRow)]
struct CandidateRow {
    id: String,
    election_id: String,
    position_id: String,
    member_id: String,
    name: String,
    email: Option<String>,
    image: Option<String>,
    bio: Option<String>,
    qualifications: Option<String>,
    status: String,
}

impl TryFrom<CandidateRow> for Candidate {
    type Error = EngineError;

    fn try_from(r: CandidateRow) -> EngineResult<Candidate> {
        Ok(Candidate {
            id: r.id,
            election_id: r.election_id,
            position_id: r.position_id,
            member_id: r.member_id,
            name: r.name,
            email: r.email,
            image: r.image,
            bio: r.bio,
            qualifications: r.qualifications,
            status: r.status.parse()?,
        })
    }
}

#[derive(FromRow)]
struct CastVoteRow {
    position_id: String,
    candidate_id: Option<String>,
    member_id: String,
    member_status: String,
    branch_id: Option<String>,
    branch_name: Option<String>,
}

impl TryFrom<CastVoteRow> for CastVote {
    type Error = EngineError;

    fn try_from(r: CastVoteRow) -> EngineResult<CastVote> {
        let status: MemberStatus = r.member_status.parse()?;
        Ok(CastVote {
            position_id: r.position_id,
            candidate_id: r.candidate_id,
            member_id: r.member_id,
            member_active: status == MemberStatus::Active,
            branch_id: r.branch_id,
            branch_name: r.branch_name,
        })
    }
}

#[derive(FromRow)]
struct ElectorateRow {
    branch_id: Option<String>,
    branch_name: Option<String>,
    active_members: i64,
}

#[derive(FromRow)]
struct AuditRow {
    id: i64,
    member_id: String,
    action: String,
    entity_type: String,
    entity_id: String,
    details: String,
    created_at: DateTime<Utc>,
}

// ********* Reads **********

pub(crate) async fn fetch_member(
    conn: &mut SqliteConnection,
    member_id: &str,
) -> EngineResult<Option<Member>> {
    sqlx::query_as::<_, MemberRow>(
        "SELECT id, name, email, status, branch_id, role FROM member WHERE id = ?",
    )
    .bind(member_id)
    .fetch_optional(&mut *conn)
    .await
    .context(StorageSnafu)?
    .map(Member::try_from)
    .transpose()
}

const ELECTION_COLUMNS: &str =
    "id, title, description, status, vote_type, voting_start, voting_end, is_anonymous";

pub(crate) async fn fetch_election(
    conn: &mut SqliteConnection,
    election_id: &str,
) -> EngineResult<Option<Election>> {
    let sql = format!("SELECT {} FROM election WHERE id = ?", ELECTION_COLUMNS);
    sqlx::query_as::<_, ElectionRow>(&sql)
        .bind(election_id)
        .fetch_optional(&mut *conn)
        .await
        .context(StorageSnafu)?
        .map(Election::try_from)
        .transpose()
}

/// Elections currently in the VOTING_ACTIVE state, closing soonest first.
pub(crate) async fn fetch_voting_elections(
    conn: &mut SqliteConnection,
) -> EngineResult<Vec<Election>> {
    let sql = format!(
        "SELECT {} FROM election WHERE status = ? ORDER BY voting_end, id",
        ELECTION_COLUMNS
    );
    sqlx::query_as::<_, ElectionRow>(&sql)
        .bind(ElectionStatus::VotingActive.as_str())
        .fetch_all(&mut *conn)
        .await
        .context(StorageSnafu)?
        .into_iter()
        .map(Election::try_from)
        .collect()
}

/// Positions in display order.
pub(crate) async fn fetch_positions(
    conn: &mut SqliteConnection,
    election_id: &str,
) -> EngineResult<Vec<Position>> {
    let rows = sqlx::query_as::<_, PositionRow>(
        "SELECT id, election_id, title, description, sort_order
         FROM position WHERE election_id = ? ORDER BY sort_order, rowid",
    )
    .bind(election_id)
    .fetch_all(&mut *conn)
    .await
    .context(StorageSnafu)?;
    Ok(rows.into_iter().map(Position::from).collect())
}

pub(crate) async fn count_positions(
    conn: &mut SqliteConnection,
    election_id: &str,
) -> EngineResult<u64> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM position WHERE election_id = ?")
        .bind(election_id)
        .fetch_one(&mut *conn)
        .await
        .context(StorageSnafu)?;
    Ok(n as u64)
}

/// Approved candidates of an election, in listing order.
pub(crate) async fn fetch_approved_candidates(
    conn: &mut SqliteConnection,
    election_id: &str,
) -> EngineResult<Vec<Candidate>> {
    sqlx::query_as::<_, CandidateRow>(
        "SELECT c.id, c.election_id, c.position_id, c.member_id, m.name, m.email,
                c.image, c.bio, c.qualifications, c.status
         FROM candidate c
         JOIN member m ON m.id = c.member_id
         WHERE c.election_id = ? AND c.status = ?
         ORDER BY c.rowid",
    )
    .bind(election_id)
    .bind(CandidateStatus::Approved.as_str())
    .fetch_all(&mut *conn)
    .await
    .context(StorageSnafu)?
    .into_iter()
    .map(Candidate::try_from)
    .collect()
}

pub(crate) async fn has_ballot(
    conn: &mut SqliteConnection,
    member_id: &str,
    election_id: &str,
) -> EngineResult<bool> {
    let n: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM ballot WHERE member_id = ? AND election_id = ?")
            .bind(member_id)
            .bind(election_id)
            .fetch_one(&mut *conn)
            .await
            .context(StorageSnafu)?;
    Ok(n > 0)
}

pub(crate) async fn fetch_voted_elections(
    conn: &mut SqliteConnection,
    member_id: &str,
) -> EngineResult<HashSet<String>> {
    let ids: Vec<String> = sqlx::query_scalar("SELECT election_id FROM ballot WHERE member_id = ?")
        .bind(member_id)
        .fetch_all(&mut *conn)
        .await
        .context(StorageSnafu)?;
    Ok(ids.into_iter().collect())
}

/// Every vote row of the election, abstentions included.
pub(crate) async fn fetch_cast_votes(
    conn: &mut SqliteConnection,
    election_id: &str,
) -> EngineResult<Vec<CastVote>> {
    sqlx::query_as::<_, CastVoteRow>(
        "SELECT v.position_id, v.candidate_id, v.member_id, m.status AS member_status,
                m.branch_id, b.name AS branch_name
         FROM vote v
         JOIN member m ON m.id = v.member_id
         LEFT JOIN branch b ON b.id = m.branch_id
         WHERE v.election_id = ?
         ORDER BY v.rowid",
    )
    .bind(election_id)
    .fetch_all(&mut *conn)
    .await
    .context(StorageSnafu)?
    .into_iter()
    .map(CastVote::try_from)
    .collect()
}

/// Active members per branch, plus known branches that currently have none.
pub(crate) async fn fetch_electorate(
    conn: &mut SqliteConnection,
) -> EngineResult<Vec<BranchElectorate>> {
    let rows = sqlx::query_as::<_, ElectorateRow>(
        "SELECT m.branch_id AS branch_id, b.name AS branch_name, COUNT(*) AS active_members
         FROM member m
         LEFT JOIN branch b ON b.id = m.branch_id
         WHERE m.status = ?
         GROUP BY m.branch_id, b.name
         UNION ALL
         SELECT b.id AS branch_id, b.name AS branch_name, 0 AS active_members
         FROM branch b
         WHERE NOT EXISTS (
             SELECT 1 FROM member m WHERE m.branch_id = b.id AND m.status = ?
         )",
    )
    .bind(MemberStatus::Active.as_str())
    .bind(MemberStatus::Active.as_str())
    .fetch_all(&mut *conn)
    .await
    .context(StorageSnafu)?;
    Ok(rows
        .into_iter()
        .map(|r| BranchElectorate {
            branch_id: r.branch_id,
            branch_name: r.branch_name,
            active_members: r.active_members.max(0) as u64,
        })
        .collect())
}

pub(crate) async fn fetch_audit_entries(
    conn: &mut SqliteConnection,
    election_id: &str,
) -> EngineResult<Vec<AuditEntry>> {
    let rows = sqlx::query_as::<_, AuditRow>(
        "SELECT id, member_id, action, entity_type, entity_id, details, created_at
         FROM audit_log WHERE entity_id = ? ORDER BY id",
    )
    .bind(election_id)
    .fetch_all(&mut *conn)
    .await
    .context(StorageSnafu)?;
    rows.into_iter()
        .map(|r| -> EngineResult<AuditEntry> {
            Ok(AuditEntry {
                id: r.id,
                member_id: r.member_id,
                action: r.action,
                entity_type: r.entity_type,
                entity_id: r.entity_id,
                details: serde_json::from_str(&r.details).context(AuditEncodingSnafu)?,
                created_at: r.created_at,
            })
        })
        .collect()
}

// ********* Writes **********

/// Claims the (member, election) slot. Fails with a unique violation if a ballot exists.
pub(crate) async fn insert_ballot(
    conn: &mut SqliteConnection,
    ballot_id: &str,
    election_id: &str,
    member_id: &str,
    cast_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO ballot (id, election_id, member_id, cast_at) VALUES (?, ?, ?, ?)")
        .bind(ballot_id)
        .bind(election_id)
        .bind(member_id)
        .bind(cast_at)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub(crate) struct NewVote<'a> {
    pub id: &'a str,
    pub ballot_id: &'a str,
    pub election_id: &'a str,
    pub position_id: &'a str,
    pub candidate_id: Option<&'a str>,
    pub member_id: &'a str,
    pub vote_token: &'a str,
    pub created_at: DateTime<Utc>,
}

pub(crate) async fn insert_vote(conn: &mut SqliteConnection, v: &NewVote<'_>) -> EngineResult<()> {
    sqlx::query(
        "INSERT INTO vote
            (id, ballot_id, election_id, position_id, candidate_id, member_id, vote_token, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(v.id)
    .bind(v.ballot_id)
    .bind(v.election_id)
    .bind(v.position_id)
    .bind(v.candidate_id)
    .bind(v.member_id)
    .bind(v.vote_token)
    .bind(v.created_at)
    .execute(&mut *conn)
    .await
    .context(StorageSnafu)?;
    Ok(())
}

pub(crate) async fn insert_audit(
    conn: &mut SqliteConnection,
    member_id: &str,
    action: &str,
    entity_type: &str,
    entity_id: &str,
    details: &serde_json::Value,
    created_at: DateTime<Utc>,
) -> EngineResult<()> {
    let details = serde_json::to_string(details).context(AuditEncodingSnafu)?;
    sqlx::query(
        "INSERT INTO audit_log (member_id, action, entity_type, entity_id, details, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(member_id)
    .bind(action)
    .bind(entity_type)
    .bind(entity_id)
    .bind(details)
    .bind(created_at)
    .execute(&mut *conn)
    .await
    .context(StorageSnafu)?;
    Ok(())
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}
