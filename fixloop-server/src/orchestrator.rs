//! Event routing and the fix/merge workflows.
//!
//! Every inbound event runs under its PR's key lock, so the dedup check, the
//! collaborator calls and the resulting state updates for one PR never
//! interleave with another event for the same PR. Collaborator failures stop
//! at this boundary: they become a recorded fix attempt and a PR comment.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use fixloop_core::loops::LOOP_THRESHOLD;
use fixloop_core::{
    dedup_issues, detect_loops, inline_comment, is_approval, parse_issues, reconcile, validate,
    Author, Command, CommandAction, CommandParser, Comment, CommentId, HistoryReport, Issue,
    LoopReport, ReviewClassifier, ReviewerInlineComment,
};
use tracing::{error, info, warn};

use crate::config::MergeMethod;
use crate::ports::{
    FileFix, FixGenerator, FixIssue, FixRequest, HostingPlatform, MergeRequest, PrRef,
    PullRequestDetails, ReviewCommentContext, WorkingCopy, WorkspaceProvider,
};
use crate::state::{
    AutomationStatus, FixOutcome, MonitorOptions, PrAutomationState, PrStateStore, StateUpdate,
};

/// Which webhook produced the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// `pull_request_review` / `submitted`
    ReviewSubmitted,
    /// `issue_comment` / `created` on a pull request
    IssueCommentCreated,
}

/// A routed webhook delivery: which PR, and the comment or review that triggered it.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub kind: EventKind,
    pub pr: PrRef,
    pub comment: Comment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    OwnComment,
    NotReviewer,
    NotMonitored,
    AlreadyApproved,
}

/// Why a fix attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixFailure {
    FetchFailed(String),
    GenerationTimedOut(Duration),
    GenerationFailed(String),
    NoFixesProduced,
    Workspace(String),
    NothingToCommit,
}

impl fmt::Display for FixFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FixFailure::FetchFailed(e) => write!(f, "Failed to fetch review feedback: {}", e),
            FixFailure::GenerationTimedOut(limit) => {
                write!(f, "Fix generation timed out after {}s", limit.as_secs())
            }
            FixFailure::GenerationFailed(e) => write!(f, "Failed to generate fixes: {}", e),
            FixFailure::NoFixesProduced => write!(f, "Fix generator produced no fixes"),
            FixFailure::Workspace(e) => write!(f, "Failed to apply fixes: {}", e),
            FixFailure::NothingToCommit => write!(f, "Generated fixes produced no changes to commit"),
        }
    }
}

/// Result of one run of the fix workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixRun {
    Applied {
        issue_count: usize,
        fix_count: usize,
    },
    Failed(FixFailure),
    LoopHalted {
        loop_count: usize,
    },
    DryRun {
        issue_count: usize,
    },
    NothingToFix,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Ignored(IgnoreReason),
    Duplicate,
    CommandRejected(Vec<String>),
    CommandFailed(String),
    TookOver {
        unresolved: usize,
        loops: usize,
        fix: Option<FixRun>,
    },
    Fix(FixRun),
    ReviewRequested(String),
    Stopped,
    /// `stop` on a PR that was not being monitored.
    NotMonitoring,
    StatusReported,
    HelpShown,
    Approved {
        merged: bool,
    },
    NoIssues,
}

/// Fix workflow options, taken from `fix` command flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixOptions {
    /// Only consider feedback from authors whose handle contains this.
    pub target: Option<String>,
    pub force: bool,
    pub dry_run: bool,
    pub message: Option<String>,
}

impl FixOptions {
    pub fn from_command(command: &Command) -> Self {
        Self {
            target: command.target.clone(),
            force: command.is_forced(),
            dry_run: command.is_dry_run(),
            message: command.param_value("message").map(str::to_string),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Handle that re-review requests are addressed to.
    pub reviewer_handle: String,
    pub fix_timeout: Duration,
    pub merge_method: MergeMethod,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            reviewer_handle: "codex".to_string(),
            fix_timeout: Duration::from_secs(60),
            merge_method: MergeMethod::Squash,
        }
    }
}

/// Feedback gathered for one fix attempt.
struct Feedback {
    details: PullRequestDetails,
    issues: Vec<Issue>,
    inline: Vec<ReviewerInlineComment>,
    loops: LoopReport,
}

pub struct Orchestrator {
    store: Arc<PrStateStore>,
    classifier: ReviewClassifier,
    parser: CommandParser,
    platform: Arc<dyn HostingPlatform>,
    fix_generator: Arc<dyn FixGenerator>,
    workspaces: Arc<dyn WorkspaceProvider>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        store: Arc<PrStateStore>,
        classifier: ReviewClassifier,
        parser: CommandParser,
        platform: Arc<dyn HostingPlatform>,
        fix_generator: Arc<dyn FixGenerator>,
        workspaces: Arc<dyn WorkspaceProvider>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            classifier,
            parser,
            platform,
            fix_generator,
            workspaces,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<PrStateStore> {
        &self.store
    }

    /// Handle one inbound event. Never fails: errors are logged and reported
    /// on the PR.
    pub async fn handle_event(&self, event: InboundEvent) -> EventOutcome {
        let _guard = self.store.lock_key(&event.pr.key).await;

        if self.is_own_comment(&event.comment.author) {
            return EventOutcome::Ignored(IgnoreReason::OwnComment);
        }

        if self.parser.mentions_bot(&event.comment.body) {
            info!(
                "Processing @{} mention on PR {} (comment {})",
                self.parser.bot_name(),
                event.pr.key,
                event.comment.id
            );
            let command = self.parser.parse(&event.comment.body);
            return self.handle_command(&event.pr, event.comment.id, command).await;
        }

        self.handle_reviewer_event(&event).await
    }

    fn is_own_comment(&self, author: &Author) -> bool {
        author.is_bot
            && author
                .login
                .trim_end_matches("[bot]")
                .eq_ignore_ascii_case(self.parser.bot_name())
    }

    async fn handle_command(
        &self,
        pr: &PrRef,
        comment_id: CommentId,
        command: Command,
    ) -> EventOutcome {
        if self.store.is_monitored(&pr.key).await
            && !self.store.claim_comment(&pr.key, comment_id).await
        {
            return EventOutcome::Duplicate;
        }

        let validation = validate(&command);
        if !validation.valid {
            warn!(
                "Rejected {} command on PR {}: {:?}",
                command.action, pr.key, validation.errors
            );
            let errors: String = validation
                .errors
                .iter()
                .map(|e| format!("- {}\n", e))
                .collect();
            self.post(
                pr,
                &format!(
                    "⚠️ **Invalid command**\n\n{}\nUse `@{} help` to see available commands.",
                    errors,
                    self.parser.bot_name()
                ),
            )
            .await;
            return EventOutcome::CommandRejected(validation.errors);
        }

        match command.action {
            CommandAction::Takeover => self.takeover(pr, comment_id).await,
            CommandAction::Fix => {
                EventOutcome::Fix(self.run_fix(pr, FixOptions::from_command(&command), None).await)
            }
            CommandAction::Review => {
                let handle = command
                    .target
                    .clone()
                    .unwrap_or_else(|| self.settings.reviewer_handle.clone());
                self.post(pr, &format!("@{} Please review the latest changes.", handle))
                    .await;
                info!("Requested review from @{} on PR {}", handle, pr.key);
                EventOutcome::ReviewRequested(handle)
            }
            CommandAction::Stop => {
                if !self.store.is_monitored(&pr.key).await {
                    self.post(
                        pr,
                        &format!(
                            "ℹ️ **{bot} is not monitoring this PR**\n\nThere is nothing to stop. \
                             Use `@{bot} takeover` to start automation.",
                            bot = self.parser.bot_name()
                        ),
                    )
                    .await;
                    return EventOutcome::NotMonitoring;
                }
                self.store.stop_monitoring(&pr.key).await;
                self.post(
                    pr,
                    &format!(
                        "🛑 **{bot} deactivated**\n\nAutomation stopped for this PR. \
                         You can reactivate me with `@{bot} takeover`.",
                        bot = self.parser.bot_name()
                    ),
                )
                .await;
                EventOutcome::Stopped
            }
            CommandAction::Status => {
                let state = self.store.get(&pr.key).await;
                self.post(pr, &self.status_message(state.as_ref())).await;
                EventOutcome::StatusReported
            }
            CommandAction::Help => {
                self.post(pr, &self.parser.help_text()).await;
                EventOutcome::HelpShown
            }
        }
    }

    async fn takeover(&self, pr: &PrRef, comment_id: CommentId) -> EventOutcome {
        let details = match self.platform.get_pull_request(pr).await {
            Ok(details) => details,
            Err(e) => {
                error!("Failed to take over PR {}: {:#}", pr.key, e);
                self.report_error(pr, &format!("{:#}", e)).await;
                return EventOutcome::CommandFailed(format!("{:#}", e));
            }
        };

        self.store
            .start_monitoring(
                &pr.key,
                MonitorOptions {
                    branch: details.head_ref.clone(),
                    base_branch: details.base_ref.clone(),
                },
            )
            .await;
        self.store.mark_comment_processed(&pr.key, comment_id).await;

        let report = match self.reconcile_history(pr).await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!("History reconciliation failed for PR {}: {:#}", pr.key, e);
                None
            }
        };

        self.post(pr, &self.activation_message(report.as_ref()))
            .await;
        info!("Took over PR {}", pr.key);

        let Some(report) = report else {
            return EventOutcome::TookOver {
                unresolved: 0,
                loops: 0,
                fix: None,
            };
        };

        let fix = if report.has_unresolved() && !report.loops.has_loops && !report.is_approved {
            let seeds = report
                .unresolved_issues
                .iter()
                .map(|text| Issue::new(text.clone(), text.clone()))
                .collect();
            Some(self.run_fix(pr, FixOptions::default(), Some(seeds)).await)
        } else {
            None
        };

        EventOutcome::TookOver {
            unresolved: report.unresolved_issues.len(),
            loops: report.loops.loops.len(),
            fix,
        }
    }

    async fn reconcile_history(&self, pr: &PrRef) -> Result<HistoryReport> {
        let mut comments = self
            .platform
            .list_issue_comments(pr)
            .await
            .context("Failed to list issue comments")?;
        comments.extend(
            self.platform
                .list_reviews(pr)
                .await
                .context("Failed to list reviews")?,
        );
        let commits = self
            .platform
            .list_commits(pr)
            .await
            .context("Failed to list commits")?;

        Ok(reconcile(&self.classifier, &comments, &commits))
    }

    async fn handle_reviewer_event(&self, event: &InboundEvent) -> EventOutcome {
        let key = &event.pr.key;

        if !self.classifier.is_from_reviewer(&event.comment) {
            return EventOutcome::Ignored(IgnoreReason::NotReviewer);
        }

        let Some(state) = self.store.get(key).await.filter(|s| s.monitored) else {
            return EventOutcome::Ignored(IgnoreReason::NotMonitored);
        };

        if state.status == AutomationStatus::Approved {
            info!("PR {} already approved; ignoring reviewer event", key);
            return EventOutcome::Ignored(IgnoreReason::AlreadyApproved);
        }

        if !self.store.claim_comment(key, event.comment.id).await {
            return EventOutcome::Duplicate;
        }

        info!(
            "Detected reviewer {:?} {} on PR {}",
            event.kind, event.comment.id, key
        );

        let parsed = self.classifier.parse_review(&event.comment);
        self.store
            .update_state(key, StateUpdate::reviewer_event(parsed.clone()))
            .await;

        if parsed.is_approval {
            return self.approve_and_merge(&event.pr).await;
        }

        if parsed.issues.is_empty() {
            if state.status == AutomationStatus::WaitingReview {
                self.store
                    .update_state(key, StateUpdate::status(AutomationStatus::Active))
                    .await;
            }
            return EventOutcome::NoIssues;
        }

        info!(
            "Found {} issues in reviewer feedback on PR {}; applying fixes",
            parsed.issues.len(),
            key
        );
        EventOutcome::Fix(
            self.run_fix(&event.pr, FixOptions::default(), Some(parsed.issues))
                .await,
        )
    }

    /// Approve, then merge. A failed merge is reported but the approval stands.
    async fn approve_and_merge(&self, pr: &PrRef) -> EventOutcome {
        info!("Reviewer approved PR {}; triggering auto-merge", pr.key);
        self.store
            .update_state(&pr.key, StateUpdate::status(AutomationStatus::Approved))
            .await;

        let handle = &self.settings.reviewer_handle;
        self.post(
            pr,
            &format!(
                "✅ **@{} approved!**\n\nAll issues resolved. Auto-merging now...",
                handle
            ),
        )
        .await;

        let request = MergeRequest {
            method: self.settings.merge_method,
            commit_title: format!("Auto-merge: PR #{} approved by {}", pr.key.pr_number, handle),
            commit_message: format!(
                "Automatically merged after {} approval via {}",
                handle,
                self.parser.bot_name()
            ),
        };

        match self.platform.merge_pull_request(pr, &request).await {
            Ok(()) => {
                self.store.stop_monitoring(&pr.key).await;
                info!("Auto-merged PR {}", pr.key);
                EventOutcome::Approved { merged: true }
            }
            Err(e) => {
                error!("Failed to auto-merge PR {}: {:#}", pr.key, e);
                self.post(
                    pr,
                    &format!(
                        "⚠️ **Auto-merge failed**\n\nError: {:#}\n\nPlease merge manually or check PR settings.",
                        e
                    ),
                )
                .await;
                EventOutcome::Approved { merged: false }
            }
        }
    }

    /// Gather feedback, gate on loops, generate fixes, and push them.
    ///
    /// `seed` replaces the latest-feedback lookup when the triggering event
    /// already carries its issues.
    async fn run_fix(&self, pr: &PrRef, options: FixOptions, seed: Option<Vec<Issue>>) -> FixRun {
        let feedback = match self.gather_feedback(pr, &options, seed).await {
            Ok(feedback) => feedback,
            Err(e) => {
                return self
                    .fail_fix(pr, 0, FixFailure::FetchFailed(format!("{:#}", e)))
                    .await
            }
        };

        if feedback.issues.is_empty() {
            info!("No issues to fix on PR {}", pr.key);
            self.post(pr, "ℹ️ No reviewer issues found to fix.").await;
            return FixRun::NothingToFix;
        }

        if feedback.loops.has_loops && !options.force {
            return self.halt_on_loops(pr, &feedback.loops).await;
        }

        let issue_count = feedback.issues.len();

        if options.dry_run {
            let list: String = feedback
                .issues
                .iter()
                .map(|issue| format!("- [{}] {}\n", issue.category, issue.text))
                .collect();
            self.post(
                pr,
                &format!(
                    "🔍 **Dry run**\n\nWould fix {} issue(s):\n\n{}",
                    issue_count, list
                ),
            )
            .await;
            return FixRun::DryRun { issue_count };
        }

        self.post(
            pr,
            &format!(
                "🔧 **Applying fixes...**\n\nFound {} issue(s) from review. Working on fixes now...",
                issue_count
            ),
        )
        .await;

        let request = FixRequest {
            pr_title: feedback.details.title.clone(),
            pr_description: feedback.details.body.clone(),
            branch: feedback.details.head_ref.clone(),
            base_branch: feedback.details.base_ref.clone(),
            issues: feedback.issues.iter().map(FixIssue::from).collect(),
            review_comments: feedback
                .inline
                .iter()
                .map(ReviewCommentContext::from)
                .collect(),
        };

        info!("Generating fixes for {} issues on PR {}", issue_count, pr.key);
        let limit = self.settings.fix_timeout;
        let fixes = match tokio::time::timeout(limit, self.fix_generator.generate_fixes(&request))
            .await
        {
            Err(_) => {
                return self
                    .fail_fix(pr, issue_count, FixFailure::GenerationTimedOut(limit))
                    .await
            }
            Ok(Err(e)) => {
                return self
                    .fail_fix(
                        pr,
                        issue_count,
                        FixFailure::GenerationFailed(format!("{:#}", e)),
                    )
                    .await
            }
            Ok(Ok(fixes)) if fixes.is_empty() => {
                return self
                    .fail_fix(pr, issue_count, FixFailure::NoFixesProduced)
                    .await
            }
            Ok(Ok(fixes)) => fixes,
        };

        let message = options.message.clone().unwrap_or_else(|| {
            format!(
                "fix: Apply review fixes\n\nAuto-generated fixes by {}",
                self.parser.bot_name()
            )
        });

        if let Err(failure) = self
            .apply_fixes(pr, &feedback.details.head_ref, &fixes, &message)
            .await
        {
            return self.fail_fix(pr, issue_count, failure).await;
        }

        let fix_count = fixes.len();
        self.store
            .record_fix_attempt(&pr.key, FixOutcome::succeeded(issue_count, fix_count))
            .await;
        self.store
            .update_state(&pr.key, StateUpdate::status(AutomationStatus::WaitingReview))
            .await;

        self.post(
            pr,
            &format!(
                "✅ **Fixes applied!**\n\nApplied {} fix(es) addressing {} issue(s).\n\n@{} Please review the changes.",
                fix_count, issue_count, self.settings.reviewer_handle
            ),
        )
        .await;
        info!(
            "Applied {} fixes for {} issues on PR {}",
            fix_count, issue_count, pr.key
        );

        FixRun::Applied {
            issue_count,
            fix_count,
        }
    }

    fn is_feedback_author(&self, author: &Author, target: Option<&str>) -> bool {
        match target {
            Some(target) => author
                .login
                .to_lowercase()
                .contains(&target.to_lowercase()),
            None => self.classifier.is_reviewer(author),
        }
    }

    async fn gather_feedback(
        &self,
        pr: &PrRef,
        options: &FixOptions,
        seed: Option<Vec<Issue>>,
    ) -> Result<Feedback> {
        let target = options.target.as_deref();

        let details = self
            .platform
            .get_pull_request(pr)
            .await
            .context("Failed to fetch pull request")?;
        let reviews = self
            .platform
            .list_reviews(pr)
            .await
            .context("Failed to list reviews")?;
        let review_comments = self
            .platform
            .list_review_comments(pr)
            .await
            .context("Failed to list review comments")?;
        let issue_comments = self
            .platform
            .list_issue_comments(pr)
            .await
            .context("Failed to list issue comments")?;

        let mut history: Vec<&Comment> = reviews
            .iter()
            .chain(issue_comments.iter())
            .chain(review_comments.iter())
            .filter(|c| self.is_feedback_author(&c.author, target))
            .collect();
        history.sort_by_key(|c| c.created_at);

        let seed = seed.unwrap_or_else(|| {
            // Latest summary-level feedback; inline comments are added below.
            reviews
                .iter()
                .chain(issue_comments.iter())
                .filter(|c| self.is_feedback_author(&c.author, target))
                .max_by_key(|c| c.created_at)
                .filter(|c| !is_approval(&c.body))
                .map(|c| parse_issues(&c.body))
                .unwrap_or_default()
        });

        let inline: Vec<ReviewerInlineComment> = review_comments
            .iter()
            .filter(|c| self.is_feedback_author(&c.author, target))
            .map(inline_comment)
            .collect();

        let issues = dedup_issues(
            seed.into_iter()
                .chain(inline.iter().flat_map(|c| c.issues.iter().cloned())),
        );

        Ok(Feedback {
            details,
            issues,
            inline,
            loops: detect_loops(history),
        })
    }

    /// Clone, apply, commit and push. The working copy is always cleaned up.
    async fn apply_fixes(
        &self,
        pr: &PrRef,
        branch: &str,
        fixes: &[FileFix],
        message: &str,
    ) -> Result<(), FixFailure> {
        let mut copy = self
            .workspaces
            .open(pr)
            .await
            .map_err(|e| FixFailure::Workspace(format!("{:#}", e)))?;

        let result = push_fixes(copy.as_mut(), branch, fixes, message).await;
        copy.cleanup().await;
        result
    }

    async fn halt_on_loops(&self, pr: &PrRef, loops: &LoopReport) -> FixRun {
        warn!(
            "Halting automation on PR {}: {} recurring issues",
            pr.key,
            loops.loops.len()
        );
        let list: String = loops
            .loops
            .iter()
            .map(|record| {
                format!(
                    "- `{}` ({} times)\n",
                    record.normalized_issue_text,
                    record.occurrences.len()
                )
            })
            .collect();
        self.post(
            pr,
            &format!(
                "🛑 **Fix loop detected**\n\nThe same issues have been raised {}+ times:\n\n{}\n\
                 Automation stopped to avoid an endless fix cycle. Fix these manually, \
                 or use `@{} fix --force` to try again.",
                LOOP_THRESHOLD,
                list,
                self.parser.bot_name()
            ),
        )
        .await;
        self.store.stop_monitoring(&pr.key).await;

        FixRun::LoopHalted {
            loop_count: loops.loops.len(),
        }
    }

    /// Record the failed attempt and report it. State is otherwise unchanged.
    async fn fail_fix(&self, pr: &PrRef, issue_count: usize, failure: FixFailure) -> FixRun {
        error!("Fix attempt failed for PR {}: {}", pr.key, failure);
        self.store
            .record_fix_attempt(&pr.key, FixOutcome::failed(issue_count, failure.to_string()))
            .await;
        self.report_error(pr, &failure.to_string()).await;
        FixRun::Failed(failure)
    }

    fn activation_message(&self, report: Option<&HistoryReport>) -> String {
        let bot = self.parser.bot_name();
        let handle = &self.settings.reviewer_handle;
        let mut body = format!(
            "🤖 **{bot} activated!**\n\n\
             I'm now monitoring this PR for reviews from @{handle}. Here's what I'll do:\n\n\
             ✅ Detect reviewer comments\n\
             ✅ Parse and analyze identified issues\n\
             ✅ Apply fixes\n\
             ✅ Request re-review from @{handle}\n\
             ✅ Auto-merge when approved\n\n\
             You can stop me anytime with `@{bot} stop`.\n\n"
        );

        match report {
            Some(report) if report.is_approved => {
                body.push_str("**History:** the latest review is an approval.\n");
            }
            Some(report) if report.loops.has_loops => {
                body.push_str("**Recurring issues (not fixing automatically):**\n");
                for record in &report.loops.loops {
                    body.push_str(&format!(
                        "- `{}` ({} times)\n",
                        record.normalized_issue_text,
                        record.occurrences.len()
                    ));
                }
                body.push_str(&format!(
                    "\nUse `@{bot} fix --force` to attempt fixes anyway.\n"
                ));
            }
            Some(report) if report.has_unresolved() => {
                body.push_str("**Unresolved issues from earlier reviews:**\n");
                for issue in &report.unresolved_issues {
                    body.push_str(&format!("- {}\n", issue));
                }
            }
            _ => body.push_str("*Waiting for review...*\n"),
        }

        body
    }

    fn status_message(&self, state: Option<&PrAutomationState>) -> String {
        let bot = self.parser.bot_name();
        let Some(state) = state.filter(|s| s.monitored) else {
            return format!(
                "ℹ️ **Status: Not monitoring**\n\nThis PR is not under automation. \
                 Use `@{bot} takeover` to start."
            );
        };

        let last_review = state
            .last_reviewer_event
            .as_ref()
            .map(|review| review.timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "None".to_string());

        format!(
            "{} **Status: {}**\n\n\
             **Started:** {}\n\
             **Fix attempts:** {} ({} successful)\n\
             **Processed comments:** {}\n\
             **Last reviewer event:** {}\n\n\
             Use `@{} stop` to deactivate.",
            state.status.emoji(),
            state.status,
            state.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
            state.fix_attempts.len(),
            state.successful_fix_count(),
            state.processed_comment_ids.len(),
            last_review,
            bot
        )
    }

    async fn report_error(&self, pr: &PrRef, message: &str) {
        self.post(
            pr,
            &format!(
                "❌ **Error occurred**\n\n```\n{}\n```\n\nPlease check the logs or contact support.",
                message
            ),
        )
        .await;
    }

    /// Post a comment. Failures are logged, never propagated.
    async fn post(&self, pr: &PrRef, body: &str) {
        if let Err(e) = self.platform.post_comment(pr, body).await {
            error!("Failed to post comment on PR {}: {:#}", pr.key, e);
        }
    }
}

async fn push_fixes(
    copy: &mut dyn WorkingCopy,
    branch: &str,
    fixes: &[FileFix],
    message: &str,
) -> Result<(), FixFailure> {
    let workspace_err = |e: anyhow::Error| FixFailure::Workspace(format!("{:#}", e));

    copy.clone_branch(branch).await.map_err(workspace_err)?;
    copy.apply_changes(fixes).await.map_err(workspace_err)?;
    match copy.commit_and_push(message, branch).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(FixFailure::NothingToCommit),
        Err(e) => Err(workspace_err(e)),
    }
}
