//! Two-level comment threads.
//!
//! Storage keeps comments flat with an optional `parent_id`. Reading an
//! article's discussion turns that into [`TopLevelComment`]s each holding
//! its [`Reply`]s; the type itself cannot nest deeper than that.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::models::{Comment, Id};

pub const MAX_COMMENT_LEN: usize = 5_000;

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub id: Id,
    pub content: String,
    pub article_id: Id,
    pub author_id: Id,
    pub author_email: Option<String>,
    pub parent_id: Id,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TopLevelComment {
    pub id: Id,
    pub content: String,
    pub article_id: Id,
    pub author_id: Id,
    pub author_email: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Oldest first.
    pub replies: Vec<Reply>,
}

/// Build the thread list for `article_id`.
///
/// Threads come newest first, replies inside a thread oldest first. Equal
/// timestamps fall back to id order. A reply whose parent is not a top-level
/// comment of the same input (deleted, or itself a reply) is dropped.
pub fn assemble<I>(comments: I, article_id: Id) -> Vec<TopLevelComment>
where
    I: IntoIterator<Item = Comment>,
{
    let (mut top, replies): (Vec<Comment>, Vec<Comment>) = comments
        .into_iter()
        .filter(|c| c.article_id == article_id)
        .partition(|c| c.parent_id.is_none());

    top.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

    let mut by_parent: HashMap<Id, Vec<Reply>> = HashMap::new();
    for c in replies {
        let Some(parent_id) = c.parent_id else { continue };
        by_parent.entry(parent_id).or_default().push(Reply {
            id: c.id,
            content: c.content,
            article_id: c.article_id,
            author_id: c.author_id,
            author_email: c.author_email,
            parent_id,
            created_at: c.created_at,
        });
    }

    top.into_iter()
        .map(|c| {
            let mut replies = by_parent.remove(&c.id).unwrap_or_default();
            replies.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
            TopLevelComment {
                id: c.id,
                content: c.content,
                article_id: c.article_id,
                author_id: c.author_id,
                author_email: c.author_email,
                created_at: c.created_at,
                replies,
            }
        })
        .collect()
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ParentError {
    #[error("parent comment does not exist")]
    Missing,
    #[error("parent comment belongs to another article")]
    OtherArticle,
    #[error("replies can only be made to top-level comments")]
    NotTopLevel,
}

/// Checks a prospective parent so that stored threads never exceed two levels.
pub fn validate_parent(parent: Option<&Comment>, article_id: Id) -> Result<(), ParentError> {
    let parent = parent.ok_or(ParentError::Missing)?;
    if parent.article_id != article_id {
        return Err(ParentError::OtherArticle);
    }
    if parent.parent_id.is_some() {
        return Err(ParentError::NotTopLevel);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn comment(id: Id, parent_id: Option<Id>, minute: i64) -> Comment {
        Comment {
            id,
            content: format!("c{id}"),
            article_id: 1,
            author_id: 100 + id,
            author_email: None,
            parent_id,
            created_at: t(minute),
        }
    }

    fn ids(tree: &[TopLevelComment]) -> Vec<(Id, Vec<Id>)> {
        tree.iter()
            .map(|n| (n.id, n.replies.iter().map(|r| r.id).collect()))
            .collect()
    }

    #[test]
    fn newest_thread_first_replies_attached() {
        let tree = assemble(
            vec![comment(1, None, 1), comment(2, None, 2), comment(3, Some(1), 3)],
            1,
        );
        assert_eq!(ids(&tree), vec![(2, vec![]), (1, vec![3])]);
    }

    #[test]
    fn reply_to_missing_parent_is_dropped() {
        let tree = assemble(vec![comment(4, Some(99), 1)], 1);
        assert!(tree.is_empty());
    }

    #[test]
    fn reply_to_reply_is_dropped() {
        let tree = assemble(
            vec![comment(1, None, 1), comment(2, Some(1), 2), comment(3, Some(2), 3)],
            1,
        );
        assert_eq!(ids(&tree), vec![(1, vec![2])]);
    }

    #[test]
    fn replies_are_chronological_regardless_of_input_order() {
        let tree = assemble(
            vec![
                comment(12, Some(1), 9),
                comment(1, None, 0),
                comment(10, Some(1), 3),
                comment(11, Some(1), 5),
                comment(2, None, 7),
            ],
            1,
        );
        assert_eq!(ids(&tree), vec![(2, vec![]), (1, vec![10, 11, 12])]);
        for node in &tree {
            assert!(node.replies.iter().all(|r| r.parent_id == node.id));
        }
    }

    #[test]
    fn equal_timestamps_order_by_id() {
        let tree = assemble(
            vec![comment(1, None, 0), comment(2, None, 0), comment(4, Some(1), 1), comment(3, Some(1), 1)],
            1,
        );
        assert_eq!(ids(&tree), vec![(2, vec![]), (1, vec![3, 4])]);
    }

    #[test]
    fn other_articles_are_ignored() {
        let mut foreign = comment(5, None, 10);
        foreign.article_id = 2;
        let tree = assemble(vec![comment(1, None, 0), foreign], 1);
        assert_eq!(ids(&tree), vec![(1, vec![])]);
    }

    #[test]
    fn parent_validation() {
        let top = comment(1, None, 0);
        let reply = comment(2, Some(1), 1);
        assert_eq!(validate_parent(Some(&top), 1), Ok(()));
        assert_eq!(validate_parent(None, 1), Err(ParentError::Missing));
        assert_eq!(validate_parent(Some(&top), 2), Err(ParentError::OtherArticle));
        assert_eq!(validate_parent(Some(&reply), 1), Err(ParentError::NotTopLevel));
    }
}
