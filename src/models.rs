//! Read-side model types.
//!
//! These are the shapes the query engine hands to callers: page and revision
//! metadata decoded from index rows, attachment descriptors, and the
//! lazily-evaluated page body.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::error::{QueryError, QueryResult};
use crate::repository::PageRepository;

/// Current-state metadata of one page, as stored in the index.
#[derive(Debug, Clone)]
pub struct PageInfo {
    pub seq: i64,
    pub date: DateTime<Utc>,
    pub slug: String,
    pub title: String,
    pub status: String,
    pub path: String,
    pub blob_id: String,
}

/// One historical instance of a page, tied to the commit that produced it.
#[derive(Debug, Clone)]
pub struct RevisionInfo {
    pub seq: i64,
    pub date: DateTime<Utc>,
    pub slug: String,
    pub title: String,
    pub status: String,
    pub path: String,
    pub blob_id: String,
    pub commit_id: String,
    pub tree_id: String,
    pub author: String,
    pub committer: String,
    pub author_time: DateTime<Utc>,
    pub commit_time: DateTime<Utc>,
    pub message: String,
}

/// A binary sibling of a page or revision.
#[derive(Debug, Clone)]
pub struct AttachmentInfo {
    /// Hash of the attachment's own subtree; stable while its bytes are.
    pub id: String,
    pub data_blob_id: String,
    pub metadata_blob_id: String,
    pub content_type: String,
    pub content_disposition: String,
    pub content_length: i64,
}

impl AttachmentInfo {
    /// The declared disposition rewritten for inline serving. Tolerates the
    /// historical 'atachment' misspelling found in old content.
    pub fn inline_disposition(&self) -> String {
        let d = self.content_disposition.trim();
        if d.starts_with("attachment") || d.starts_with("atachment") {
            let rest = d
                .strip_prefix("attachment")
                .or_else(|| d.strip_prefix("atachment"))
                .unwrap_or("");
            format!("inline{}", rest)
        } else {
            d.to_string()
        }
    }
}

/// A page body: a content reference plus a memoized load.
///
/// The blob is fetched from the object store at most once, and only if the
/// caller actually reads it.
#[derive(Debug)]
pub struct PageBody {
    blob_id: String,
    cached: Option<String>,
}

impl PageBody {
    pub fn new(blob_id: impl Into<String>) -> Self {
        Self {
            blob_id: blob_id.into(),
            cached: None,
        }
    }

    pub fn blob_id(&self) -> &str {
        &self.blob_id
    }

    /// Fetch (once) and return the body text.
    pub fn get(&mut self, repo: &PageRepository) -> QueryResult<&str> {
        if self.cached.is_none() {
            let oid = git2::Oid::from_str(&self.blob_id)?;
            let bytes = repo.load_blob(oid)?;
            self.cached = Some(String::from_utf8_lossy(&bytes).into_owned());
        }
        Ok(self.cached.as_deref().unwrap_or_default())
    }
}

/// A resolved page: metadata, lazy body, and (if precomputed) rendered HTML.
#[derive(Debug)]
pub struct Page {
    pub info: PageInfo,
    pub body: PageBody,
    pub rendered_html: Option<String>,
}

/// Raw pagination facts for the caller's pager rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageMetadata {
    pub total: i64,
    pub page_count: i64,
    pub page_number: i64,
    pub page_length: i64,
}

impl PageMetadata {
    pub fn new(total: i64, page_number: i64, page_length: i64) -> Self {
        let page_count = if total == 0 {
            0
        } else {
            (total + page_length - 1) / page_length
        };
        Self {
            total,
            page_count,
            page_number,
            page_length,
        }
    }
}

// ============ Row decoding ============

fn timestamp(row: &SqliteRow, column: &str) -> QueryResult<DateTime<Utc>> {
    let secs: i64 = row.try_get(column)?;
    DateTime::from_timestamp(secs, 0).ok_or_else(|| {
        QueryError::Index(sqlx::Error::Decode(
            format!("timestamp out of range in column {}", column).into(),
        ))
    })
}

pub(crate) fn page_info_from_row(row: &SqliteRow) -> QueryResult<PageInfo> {
    Ok(PageInfo {
        seq: row.try_get("seq")?,
        date: timestamp(row, "page_date")?,
        slug: row.try_get("page_slug")?,
        title: row.try_get("page_title")?,
        status: row.try_get("page_status")?,
        path: row.try_get("page_path")?,
        blob_id: row.try_get("page_blob_id")?,
    })
}

pub(crate) fn revision_info_from_row(row: &SqliteRow) -> QueryResult<RevisionInfo> {
    Ok(RevisionInfo {
        seq: row.try_get("seq")?,
        date: timestamp(row, "revision_date")?,
        slug: row.try_get("revision_slug")?,
        title: row.try_get("revision_title")?,
        status: row.try_get("revision_status")?,
        path: row.try_get("revision_path")?,
        blob_id: row.try_get("revision_blob_id")?,
        commit_id: row.try_get("revision_commit_id")?,
        tree_id: row.try_get("revision_tree_id")?,
        author: row.try_get("revision_author")?,
        committer: row.try_get("revision_committer")?,
        author_time: timestamp(row, "revision_author_time")?,
        commit_time: timestamp(row, "revision_commit_time")?,
        message: row.try_get("revision_message")?,
    })
}

pub(crate) fn attachment_from_row(row: &SqliteRow) -> QueryResult<AttachmentInfo> {
    Ok(AttachmentInfo {
        id: row.try_get("attachment_id")?,
        data_blob_id: row.try_get("attachment_data_blob_id")?,
        metadata_blob_id: row.try_get("attachment_metadata_blob_id")?,
        content_type: row.try_get("attachment_content_type")?,
        content_disposition: row.try_get("attachment_content_disposition")?,
        content_length: row.try_get("attachment_content_length")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment(disposition: &str) -> AttachmentInfo {
        AttachmentInfo {
            id: "t".into(),
            data_blob_id: "d".into(),
            metadata_blob_id: "m".into(),
            content_type: "application/octet-stream".into(),
            content_disposition: disposition.into(),
            content_length: 0,
        }
    }

    #[test]
    fn test_inline_disposition_rewrites_attachment() {
        assert_eq!(attachment("attachment").inline_disposition(), "inline");
        assert_eq!(
            attachment("attachment; filename=attach.1").inline_disposition(),
            "inline; filename=attach.1"
        );
    }

    #[test]
    fn test_inline_disposition_tolerates_misspelling() {
        assert_eq!(attachment("atachment").inline_disposition(), "inline");
    }

    #[test]
    fn test_inline_disposition_leaves_inline_alone() {
        assert_eq!(attachment("inline").inline_disposition(), "inline");
    }

    #[test]
    fn test_page_metadata_counts() {
        let meta = PageMetadata::new(10, 1, 3);
        assert_eq!(meta.page_count, 4);
        let meta = PageMetadata::new(9, 1, 3);
        assert_eq!(meta.page_count, 3);
        let meta = PageMetadata::new(0, 1, 3);
        assert_eq!(meta.page_count, 0);
    }
}
