use log::{debug, info};

use ballot_engine::{Engine, Role, Session, Store};
use clap::Parser;
use serde_json::json;
use snafu::{prelude::*, ErrorCompat};
use std::time::Duration;

mod args;
mod portal;

use crate::args::{Args, Command, Toggle};
use crate::portal::config_reader::*;
use crate::portal::fixture::*;
use crate::portal::*;

fn print_response(response: &Response) -> PortalResult<String> {
    let rendered = render(response)?;
    println!("{}", rendered);
    if !response.is_success() {
        whatever!("Request failed with status {}", response.status)
    }
    Ok(rendered)
}

/// Parses `position=candidate` pairs. An empty candidate is an abstention.
fn ballot_body(election: &str, votes: &[String]) -> PortalResult<String> {
    let mut lines = Vec::new();
    for v in votes.iter() {
        let (position, candidate) = match v.split_once('=') {
            Some(x) => x,
            None => whatever!("Expected position=candidate, got {:?}", v),
        };
        let candidate = if candidate.is_empty() {
            None
        } else {
            Some(candidate)
        };
        lines.push(json!({ "positionId": position, "candidateId": candidate }));
    }
    Ok(json!({ "electionId": election, "votes": lines }).to_string())
}

async fn run(args: Args) -> PortalResult<()> {
    let config = match args.config.as_deref() {
        Some(path) => read_config(path)?,
        None => PortalConfig::default(),
    };
    let url = args.database.clone().unwrap_or_else(|| config.database_url());
    let store = Store::connect(&url, config.max_connections())
        .await
        .context(EngineSnafu)?;
    store.init_schema().await.context(EngineSnafu)?;
    let engine = Engine::new(store);
    debug!("run: {:?}", args.command);

    match args.command {
        Command::Init => {
            println!("Database ready at {}", url);
        }
        Command::Seed { fixture } => {
            let f = read_fixture(&fixture)?;
            seed(engine.store(), &f).await?;
        }
        Command::Cast {
            member,
            election,
            votes,
        } => {
            let session = lookup_session(engine.store(), &member).await?;
            let body = ballot_body(&election, &votes)?;
            print_response(&cast_ballot(&engine, session.as_ref(), &body).await)?;
        }
        Command::Results {
            election,
            admin,
            watch,
            polls,
            reference,
        } => {
            let session = if admin {
                Some(Session {
                    member_id: "cli".to_string(),
                    role: Role::Admin,
                })
            } else {
                None
            };
            let interval = Duration::from_secs(config.poll_interval_seconds());
            let mut last: Option<String> = None;
            let mut count: u32 = 0;
            loop {
                let response = results(&engine, session.as_ref(), &election).await;
                let rendered = render(&response)?;
                if last.as_deref() != Some(rendered.as_str()) {
                    print_response(&response)?;
                } else if !response.is_success() {
                    whatever!("Request failed with status {}", response.status)
                }
                last = Some(rendered);
                count += 1;
                if !watch || polls.map(|p| count >= p).unwrap_or(false) {
                    break;
                }
                tokio::time::sleep(interval).await;
            }
            if let (Some(path), Some(rendered)) = (reference, last) {
                check_reference(&path, &rendered)?;
            }
        }
        Command::Elections { member } => {
            let session = lookup_session(engine.store(), &member).await?;
            print_response(&eligible_elections(&engine, session.as_ref()).await)?;
        }
        Command::KioskLogin { member } => {
            print_response(&kiosk_login(&engine, &member).await)?;
        }
        Command::Anonymity {
            election,
            state,
            admin,
        } => {
            let session = lookup_session(engine.store(), &admin).await?;
            let body = json!({ "isAnonymous": state == Toggle::On }).to_string();
            print_response(&set_anonymity(&engine, session.as_ref(), &election, &body).await)?;
        }
        Command::Audit { election } => {
            let entries = engine
                .store()
                .audit_entries(&election)
                .await
                .context(EngineSnafu)?;
            let rendered = serde_json::to_string_pretty(&entries).context(ParsingJsonSnafu {})?;
            println!("{}", rendered);
        }
    }
    info!("Done");
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let mut logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if args.verbose {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.init();

    if let Err(e) = run(args).await {
        eprintln!("An error occured {}", e);
        if let Some(bt) = ErrorCompat::backtrace(&e) {
            eprintln!("trace: {}", bt);
        }
        std::process::exit(1);
    }
}
