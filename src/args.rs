use clap::{Parser, Subcommand, ValueEnum};

/// Ballot casting and live results for cooperative elections.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (file path, optional) The portal configuration in JSON format. See the manual of
    /// ballot_engine for the format.
    #[clap(short, long, value_parser)]
    pub config: Option<String>,

    /// (database url, optional) For example sqlite://portal.db. Setting this option overrides
    /// the url that may be specified with the --config option.
    #[clap(short, long, value_parser)]
    pub database: Option<String>,

    // Other arguments
    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, takes_value = false)]
    pub verbose: bool,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Creates the tables if they do not exist yet.
    Init,

    /// Loads branches, members, elections, positions and candidates from a JSON fixture.
    Seed {
        #[clap(value_parser)]
        fixture: String,
    },

    /// Casts a ballot for a member.
    Cast {
        #[clap(long, value_parser)]
        member: String,
        #[clap(long, value_parser)]
        election: String,
        /// (position=candidate, repeated) One line per position. Leave the candidate empty
        /// (position=) to abstain.
        #[clap(long = "vote", value_parser)]
        votes: Vec<String>,
    },

    /// Prints the results of an election in JSON.
    Results {
        #[clap(value_parser)]
        election: String,
        /// Show the results as an administrator would see them.
        #[clap(long, takes_value = false)]
        admin: bool,
        /// Keeps polling and prints the results whenever they change.
        #[clap(long, takes_value = false)]
        watch: bool,
        /// (default unlimited) With --watch, stop after this many polls.
        #[clap(long, value_parser)]
        polls: Option<u32>,
        /// (file path) A reference file containing the expected results in JSON format. If
        /// provided, the output is compared against it.
        #[clap(short, long, value_parser)]
        reference: Option<String>,
    },

    /// Lists the elections a member can vote in right now.
    Elections {
        #[clap(long, value_parser)]
        member: String,
    },

    /// Checks whether a member may open a voting kiosk session.
    KioskLogin {
        #[clap(long, value_parser)]
        member: String,
    },

    /// Turns the anonymity of an election's results on or off.
    Anonymity {
        #[clap(value_parser)]
        election: String,
        #[clap(value_enum, value_parser)]
        state: Toggle,
        /// The administrator making the change.
        #[clap(long, value_parser)]
        admin: String,
    },

    /// Prints the audit trail of an election.
    Audit {
        #[clap(value_parser)]
        election: String,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    On,
    Off,
}
