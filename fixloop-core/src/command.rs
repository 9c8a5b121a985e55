//! Command parsing for `@<bot-name>` mentions in PR comments.
//!
//! The grammar is an ordered table of `(action, pattern)` rules; the first
//! rule that matches anywhere in the body wins. A mention with no recognized
//! action parses as `help`, so parsing never fails.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use serde::{Serialize, Serializer};
use tracing::debug;

static FLAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"--(\w[\w-]*)(?:=([\w-]+))?").expect("flag pattern must compile")
});

static QUOTED_FLAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"--(\w[\w-]*)="([^"]+)""#).expect("quoted flag pattern must compile")
});

static VALID_TARGET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("target pattern must compile"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandAction {
    Takeover,
    Fix,
    Review,
    Stop,
    Status,
    Help,
}

impl CommandAction {
    pub const ALL: [CommandAction; 6] = [
        Self::Takeover,
        Self::Fix,
        Self::Review,
        Self::Stop,
        Self::Status,
        Self::Help,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Takeover => "takeover",
            Self::Fix => "fix",
            Self::Review => "review",
            Self::Stop => "stop",
            Self::Status => "status",
            Self::Help => "help",
        }
    }

    fn takes_target(self) -> bool {
        matches!(self, Self::Fix | Self::Review)
    }

    fn description(self) -> &'static str {
        match self {
            Self::Takeover => "Take full control of PR automation",
            Self::Fix => "Apply fixes from reviewer comments",
            Self::Review => "Request re-review from a specific reviewer",
            Self::Stop => "Stop all automation for this PR",
            Self::Status => "Show current automation status",
            Self::Help => "Show this help message",
        }
    }
}

impl fmt::Display for CommandAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parameter value: a bare `--flag` or `--flag=value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Flag,
    Value(String),
}

impl Serialize for ParamValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ParamValue::Flag => serializer.serialize_bool(true),
            ParamValue::Value(value) => serializer.serialize_str(value),
        }
    }
}

/// A parsed mention command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Command {
    pub action: CommandAction,
    pub target: Option<String>,
    pub params: BTreeMap<String, ParamValue>,
}

impl Command {
    /// True if the parameter is present in any form.
    pub fn has_param(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    /// The parameter's value, if it was given one.
    pub fn param_value(&self, name: &str) -> Option<&str> {
        match self.params.get(name) {
            Some(ParamValue::Value(value)) => Some(value),
            _ => None,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.has_param("dry-run")
    }

    pub fn is_forced(&self) -> bool {
        self.has_param("force")
    }
}

/// Result of running the grammar table over a body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrammarMatch {
    Matched {
        action: CommandAction,
        target: Option<String>,
    },
    Unmatched,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandValidation {
    pub valid: bool,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone)]
struct GrammarRule {
    action: CommandAction,
    pattern: Regex,
}

/// Parses mentions addressed to one bot handle.
#[derive(Debug, Clone)]
pub struct CommandParser {
    bot_name: String,
    mention: Regex,
    rules: Vec<GrammarRule>,
}

impl CommandParser {
    pub fn new(bot_name: &str) -> Result<Self, regex::Error> {
        let bot_name = bot_name.trim_start_matches('@').to_string();
        let handle = regex::escape(&bot_name);

        let mention = RegexBuilder::new(&format!(r"@{handle}(?:[^\w-]|$)"))
            .case_insensitive(true)
            .build()?;

        let rules = CommandAction::ALL
            .iter()
            .map(|&action| {
                let pattern = if action.takes_target() {
                    format!(r"@{handle}\s+{action}\b(?:[ \t]+@?(\w[\w-]*))?")
                } else {
                    format!(r"@{handle}\s+{action}\b")
                };
                let pattern = RegexBuilder::new(&pattern).case_insensitive(true).build()?;
                Ok(GrammarRule { action, pattern })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;

        Ok(Self {
            bot_name,
            mention,
            rules,
        })
    }

    pub fn bot_name(&self) -> &str {
        &self.bot_name
    }

    /// True if the body mentions the bot (case-insensitive).
    pub fn mentions_bot(&self, body: &str) -> bool {
        self.mention.is_match(body)
    }

    /// Run the grammar table in declared order; first match wins.
    pub fn match_grammar(&self, body: &str) -> GrammarMatch {
        for rule in &self.rules {
            if let Some(captures) = rule.pattern.captures(body) {
                return GrammarMatch::Matched {
                    action: rule.action,
                    target: captures.get(1).map(|m| m.as_str().to_string()),
                };
            }
        }
        GrammarMatch::Unmatched
    }

    /// Parse a body into a command. Unmatched input becomes `help`.
    pub fn parse(&self, body: &str) -> Command {
        let (action, target) = match self.match_grammar(body) {
            GrammarMatch::Matched { action, target } => (action, target),
            GrammarMatch::Unmatched => (CommandAction::Help, None),
        };

        let command = Command {
            action,
            target,
            params: extract_params(body),
        };
        debug!("Parsed command: {:?}", command);
        command
    }

    /// Help text generated from the grammar table.
    pub fn help_text(&self) -> String {
        let bot = &self.bot_name;
        let mut text = format!("## 🤖 {bot} commands\n\n**Basic Commands:**\n");
        for action in CommandAction::ALL {
            let usage = if action.takes_target() {
                format!("@{bot} {action} [reviewer]")
            } else {
                format!("@{bot} {action}")
            };
            text.push_str(&format!("- `{usage}` - {}\n", action.description()));
        }
        text.push_str(&format!(
            "\n**Flags:**\n\
             - `--force` - Fix even when the same issues keep recurring (fix only)\n\
             - `--dry-run` - Show what would be fixed without changing anything\n\
             - `--message=\"text\"` - Custom commit message\n\
             \n**Examples:**\n\
             - `@{bot} takeover` - Start full automation\n\
             - `@{bot} fix codex` - Fix the reviewer's comments\n\
             - `@{bot} review codex` - Ask for another review\n"
        ));
        text
    }
}

/// Extract `--flag`, `--flag=value` and `--flag="quoted value"` parameters.
///
/// Quoted values overwrite bare ones for the same flag.
pub fn extract_params(body: &str) -> BTreeMap<String, ParamValue> {
    let mut params = BTreeMap::new();

    for captures in FLAG.captures_iter(body) {
        let value = match captures.get(2) {
            Some(value) => ParamValue::Value(value.as_str().to_string()),
            None => ParamValue::Flag,
        };
        params.insert(captures[1].to_string(), value);
    }

    for captures in QUOTED_FLAG.captures_iter(body) {
        params.insert(
            captures[1].to_string(),
            ParamValue::Value(captures[2].to_string()),
        );
    }

    params
}

/// Check a command's target and parameters. Problems are reported, never raised.
pub fn validate(command: &Command) -> CommandValidation {
    let mut errors = Vec::new();

    if command.action == CommandAction::Fix {
        if let Some(target) = &command.target {
            if !VALID_TARGET.is_match(target) {
                errors.push(format!("Invalid reviewer name: {target}"));
            }
        }
    }

    if command.is_forced() && command.action != CommandAction::Fix {
        errors.push("--force flag only valid with fix command".to_string());
    }

    CommandValidation {
        valid: errors.is_empty(),
        errors,
    }
}
