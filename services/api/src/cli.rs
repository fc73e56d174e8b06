use crate::demo::{
    run_demo, run_percentile_report, run_preview_report, run_ranking_report, DemoArgs,
    PercentileReportArgs, PreviewReportArgs, RankingReportArgs,
};
use crate::server;
use clap::{Args, Parser, Subcommand};
use stack_rank::error::AppError;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "Stack Rank",
    about = "Serve and inspect weighted team rankings from the command line",
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
    /// Print per-role rankings and expected-rank mismatches
    Rankings(RankingReportArgs),
    /// Print percentile buckets for one role or all roles
    Percentiles(PercentileReportArgs),
    /// Propose score changes that move a member one level toward their expected rank
    Preview(PreviewReportArgs),
    /// Walk through rankings and an adjustment on a built-in sample team
    Demo(DemoArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Directory holding Roles.csv, Scores.csv and ExpectedRanking.csv
    #[arg(long)]
    pub(crate) data_dir: Option<PathBuf>,
    /// Serve the built-in sample team from memory instead of CSV tables
    #[arg(long)]
    pub(crate) sample: bool,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Rankings(args) => run_ranking_report(args),
        Command::Percentiles(args) => run_percentile_report(args),
        Command::Preview(args) => run_preview_report(args),
        Command::Demo(args) => run_demo(args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use stack_rank::ranking::PercentileBasis;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["stack-rank-api"]).expect("parses");
        assert!(cli.command.is_none());
    }

    #[test]
    fn preview_arguments_are_parsed() {
        let cli = Cli::try_parse_from([
            "stack-rank-api",
            "preview",
            "--alias",
            "Dev03",
            "--metric",
            "Delivery",
            "--metric",
            "Code Review",
            "--percent",
            "7.5",
        ])
        .expect("parses");

        match cli.command {
            Some(Command::Preview(args)) => {
                assert_eq!(args.alias, "Dev03");
                assert_eq!(args.metric, vec!["Delivery", "Code Review"]);
                assert_eq!(args.percent, Some(7.5));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn percentile_basis_is_validated() {
        let cli = Cli::try_parse_from(["stack-rank-api", "percentiles", "--basis", "rank"])
            .expect("parses");
        match cli.command {
            Some(Command::Percentiles(args)) => assert_eq!(args.basis, PercentileBasis::Rank),
            other => panic!("unexpected command: {other:?}"),
        }

        assert!(Cli::try_parse_from(["stack-rank-api", "percentiles", "--basis", "mean"]).is_err());
    }
}
