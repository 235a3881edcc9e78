//! Persisted index schema.
//!
//! The index is one flat `records` table. Each row carries a `kind`
//! discriminator; hierarchy (page → revisions → attachments) is emulated by
//! write order: `seq` is an autoincrement primary key, every record belonging
//! to one page is written contiguously, and "children of X" is answered by
//! scanning forward from X's `seq` to the next record of equal-or-higher
//! nesting level. Boundary-marker rows (`page-dummy-child`,
//! `revision-dummy-child`) delimit the start of each group's children, since
//! SQLite has no native nested documents.
//!
//! Title fields are mirrored into an FTS5 table keyed by `seq`.

use anyhow::Result;
use sqlx::SqlitePool;

/// Discriminator for the logical entity a record represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Page,
    PageDummyChild,
    PageAttachment,
    Revision,
    RevisionDummyChild,
    RevisionAttachment,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::PageDummyChild => "page-dummy-child",
            Self::PageAttachment => "page-attachment",
            Self::Revision => "revision",
            Self::RevisionDummyChild => "revision-dummy-child",
            Self::RevisionAttachment => "revision-attachment",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "page" => Some(Self::Page),
            "page-dummy-child" => Some(Self::PageDummyChild),
            "page-attachment" => Some(Self::PageAttachment),
            "revision" => Some(Self::Revision),
            "revision-dummy-child" => Some(Self::RevisionDummyChild),
            "revision-attachment" => Some(Self::RevisionAttachment),
            _ => None,
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // One flat table for every record kind. Timestamps are unix seconds
    // (UTC); the declared offsets are applied at query time.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,

            page_date INTEGER,
            page_slug TEXT,
            page_title TEXT,
            page_status TEXT,
            page_path TEXT,
            page_blob_id TEXT,

            revision_date INTEGER,
            revision_slug TEXT,
            revision_title TEXT,
            revision_status TEXT,
            revision_path TEXT,
            revision_blob_id TEXT,
            revision_commit_id TEXT,
            revision_tree_id TEXT,
            revision_author TEXT,
            revision_committer TEXT,
            revision_author_time INTEGER,
            revision_commit_time INTEGER,
            revision_message TEXT,

            attachment_id TEXT,
            attachment_data_blob_id TEXT,
            attachment_metadata_blob_id TEXT,
            attachment_content_type TEXT,
            attachment_content_disposition TEXT,
            attachment_content_length INTEGER,

            rendered_html TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='records_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE records_fts USING fts5(
                seq UNINDEXED,
                title
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    // Lookup paths the query engine leans on
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_kind ON records(kind)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_page_slug ON records(page_slug)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_page_date ON records(page_date DESC)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_attachment_id ON records(attachment_id)")
        .execute(pool)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            RecordKind::Page,
            RecordKind::PageDummyChild,
            RecordKind::PageAttachment,
            RecordKind::Revision,
            RecordKind::RevisionDummyChild,
            RecordKind::RevisionAttachment,
        ] {
            assert_eq!(RecordKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn test_kind_parse_rejects_unknown() {
        assert_eq!(RecordKind::parse("chunk"), None);
        assert_eq!(RecordKind::parse(""), None);
    }
}
