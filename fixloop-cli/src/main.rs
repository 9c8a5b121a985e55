use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fixloop_core::classifier::{DEFAULT_REVIEWER_ALIASES, DEFAULT_REVIEWER_BOT_PATTERN};
use fixloop_core::{
    dedup_issues, parse_issues, reconcile, validate, Command, CommandParser, CommandValidation,
    Comment, CommitInfo, Issue, ReviewClassifier,
};
use serde::Serialize;
use std::fs;
use std::io::Read;

/// fixloop: inspect review history and mention commands offline
#[derive(Parser, Debug)]
#[command(name = "fixloop")]
#[command(about = "Offline tools for the fixloop review bot", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reconcile exported PR comments against commits
    History(HistoryArgs),
    /// Extract issues from a review body
    Issues(IssuesArgs),
    /// Parse a comment body as a bot command
    ParseCommand(ParseCommandArgs),
}

#[derive(Parser, Debug)]
struct ReviewerArgs {
    /// Comma-separated reviewer aliases
    #[arg(long, value_delimiter = ',')]
    aliases: Vec<String>,

    /// Pattern matched against bot account handles
    #[arg(long, default_value = DEFAULT_REVIEWER_BOT_PATTERN)]
    bot_pattern: String,
}

impl ReviewerArgs {
    fn classifier(&self) -> Result<ReviewClassifier> {
        let aliases = if self.aliases.is_empty() {
            DEFAULT_REVIEWER_ALIASES
                .iter()
                .map(|a| a.to_string())
                .collect()
        } else {
            self.aliases.clone()
        };
        ReviewClassifier::new(aliases, &self.bot_pattern).context("Invalid --bot-pattern")
    }
}

#[derive(Parser, Debug)]
struct HistoryArgs {
    /// JSON array of comments (use - for stdin)
    #[arg(long)]
    comments: String,

    /// JSON array of commits
    #[arg(long)]
    commits: Option<String>,

    #[command(flatten)]
    reviewer: ReviewerArgs,
}

#[derive(Parser, Debug)]
struct IssuesArgs {
    /// File containing the review body (use - for stdin)
    input: String,
}

#[derive(Parser, Debug)]
struct ParseCommandArgs {
    /// Bot handle, with or without the leading @
    #[arg(long, default_value = "fixloop")]
    bot: String,

    /// Comment body
    body: String,
}

#[derive(Debug, Serialize)]
struct CommandReport {
    mentioned: bool,
    command: Option<Command>,
    validation: Option<CommandValidation>,
}

fn read_input(path: &str) -> Result<String> {
    if path == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read stdin")?;
        return Ok(buffer);
    }
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))
}

fn command_report(parser: &CommandParser, body: &str) -> CommandReport {
    if !parser.mentions_bot(body) {
        return CommandReport {
            mentioned: false,
            command: None,
            validation: None,
        };
    }

    let command = parser.parse(body);
    let validation = validate(&command);
    CommandReport {
        mentioned: true,
        command: Some(command),
        validation: Some(validation),
    }
}

fn extract(body: &str) -> Vec<Issue> {
    dedup_issues(parse_issues(body))
}

fn run_history(args: HistoryArgs) -> Result<()> {
    let classifier = args.reviewer.classifier()?;
    let comments: Vec<Comment> = serde_json::from_str(&read_input(&args.comments)?)
        .context("Failed to parse comments JSON")?;
    let commits: Vec<CommitInfo> = match &args.commits {
        Some(path) => {
            serde_json::from_str(&read_input(path)?).context("Failed to parse commits JSON")?
        }
        None => Vec::new(),
    };

    let report = reconcile(&classifier, &comments, &commits);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_issues(args: IssuesArgs) -> Result<()> {
    let body = read_input(&args.input)?;
    println!("{}", serde_json::to_string_pretty(&extract(&body))?);
    Ok(())
}

fn run_parse_command(args: ParseCommandArgs) -> Result<()> {
    let parser = CommandParser::new(&args.bot).context("Invalid --bot handle")?;
    let report = command_report(&parser, &args.body);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::History(args) => run_history(args),
        Commands::Issues(args) => run_issues(args),
        Commands::ParseCommand(args) => run_parse_command(args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fixloop_core::CommandAction;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_command_report_for_unmentioned_body() {
        let parser = CommandParser::new("fixloop").unwrap();
        let report = command_report(&parser, "just a regular comment");
        assert!(!report.mentioned);
        assert!(report.command.is_none());
    }

    #[test]
    fn test_command_report_validates() {
        let parser = CommandParser::new("@fixloop").unwrap();
        let report = command_report(&parser, "@fixloop status --force");
        assert!(report.mentioned);
        assert_eq!(
            report.command.as_ref().map(|c| c.action),
            Some(CommandAction::Status)
        );
        assert!(!report.validation.unwrap().valid);
    }

    #[test]
    fn test_reviewer_args_fall_back_to_default_aliases() {
        let args = ReviewerArgs {
            aliases: Vec::new(),
            bot_pattern: DEFAULT_REVIEWER_BOT_PATTERN.to_string(),
        };
        let classifier = args.classifier().unwrap();
        assert_eq!(classifier.aliases().len(), DEFAULT_REVIEWER_ALIASES.len());
    }

    #[test]
    fn test_extract_dedups_issues() {
        let issues = extract("Issue: missing bounds check\nIssue: missing bounds check\n");
        assert_eq!(issues.len(), 1);
    }
}
