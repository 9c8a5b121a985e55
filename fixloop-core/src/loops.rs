//! Loop detection: the same reviewer complaint surviving repeated rounds.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::comment::{Comment, CommentId};
use crate::issue::parse_issues;

/// Occurrences at or above this count mark an issue as looping.
pub const LOOP_THRESHOLD: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    pub comment_id: CommentId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopRecord {
    pub normalized_issue_text: String,
    pub occurrences: Vec<Occurrence>,
}

impl LoopRecord {
    pub fn is_loop(&self) -> bool {
        self.occurrences.len() >= LOOP_THRESHOLD
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopReport {
    pub has_loops: bool,
    pub loops: Vec<LoopRecord>,
}

/// Bucket issues from every given reviewer comment by normalized text.
///
/// Callers pass only reviewer-authored comments. Each comment contributes at
/// most one occurrence per issue. Buckets keep first-seen order.
pub fn detect_loops<'a>(comments: impl IntoIterator<Item = &'a Comment>) -> LoopReport {
    let mut records: Vec<LoopRecord> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for comment in comments {
        let mut seen_in_comment = HashSet::new();
        for issue in parse_issues(&comment.body) {
            let key = issue.normalized();
            if !seen_in_comment.insert(key.clone()) {
                continue;
            }

            let occurrence = Occurrence {
                comment_id: comment.id,
                created_at: comment.created_at,
            };
            match index.get(&key) {
                Some(&slot) => records[slot].occurrences.push(occurrence),
                None => {
                    index.insert(key.clone(), records.len());
                    records.push(LoopRecord {
                        normalized_issue_text: key,
                        occurrences: vec![occurrence],
                    });
                }
            }
        }
    }

    let loops: Vec<LoopRecord> = records.into_iter().filter(LoopRecord::is_loop).collect();
    if !loops.is_empty() {
        warn!("Detected {} recurring reviewer issues", loops.len());
    }

    LoopReport {
        has_loops: !loops.is_empty(),
        loops,
    }
}
