use crate::demo::{run_demo, run_score, DemoArgs, ScoreArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use leadflow::error::AppError;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "leadflow",
    about = "Score inbound leads, route them to closers, and book conflict-free appointments",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Walk through configure, qualify, schedule, reschedule and cancel on an in-memory store
    Demo(DemoArgs),
    /// Score a lead file against an optional configuration file and print the breakdown
    Score(ScoreArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// SQLite database file; omit to keep everything in memory
    #[arg(long)]
    pub(crate) database: Option<PathBuf>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Demo(args) => run_demo(args),
        Command::Score(args) => run_score(args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_is_the_default_command() {
        let cli = Cli::try_parse_from(["leadflow"]).expect("parses");
        assert!(cli.command.is_none());
    }

    #[test]
    fn serve_accepts_database_override() {
        let cli = Cli::try_parse_from(["leadflow", "serve", "--port", "8080", "--database", "leads.db"])
            .expect("parses");
        match cli.command {
            Some(Command::Serve(args)) => {
                assert_eq!(args.port, Some(8080));
                assert_eq!(args.database, Some(PathBuf::from("leads.db")));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn score_requires_a_lead_file() {
        assert!(Cli::try_parse_from(["leadflow", "score"]).is_err());
    }
}
