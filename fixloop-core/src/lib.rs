//! Pure review-fix loop logic: comment classification, issue extraction,
//! history reconciliation, loop detection and mention-command parsing.
//!
//! Nothing in this crate performs I/O; the server crate feeds it data
//! fetched from the hosting platform.

pub mod classifier;
pub mod command;
pub mod comment;
pub mod history;
pub mod issue;
pub mod loops;

pub use classifier::{
    inline_comment, is_approval, ParsedReview, ReviewClassifier, ReviewerInlineComment,
};
pub use command::{
    validate, Command, CommandAction, CommandParser, CommandValidation, GrammarMatch, ParamValue,
};
pub use comment::{Author, Comment, CommentId, CommentKind, CommitInfo, Location};
pub use history::{reconcile, HistoryReport};
pub use issue::{dedup_issues, parse_issues, Issue, IssueCategory};
pub use loops::{detect_loops, LoopRecord, LoopReport, Occurrence};
