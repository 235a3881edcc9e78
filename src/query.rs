//! Query engine.
//!
//! All reads go through a [`QueryEngine`], which holds one open read
//! transaction against the index. The first read pins a WAL snapshot, so a
//! rebuild committing underneath never changes what an engine sees; callers
//! open a fresh engine to observe a new generation.
//!
//! Nested lookups (revisions of a page, attachments of a revision) are
//! answered by the discriminator-plus-range-scan scheme described in
//! `schema`: children of a record live between its `seq` and the next
//! record of equal-or-higher nesting level.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use crate::config::Config;
use crate::error::{QueryError, QueryResult};
use crate::models::{
    attachment_from_row, page_info_from_row, revision_info_from_row, AttachmentInfo, Page,
    PageBody, PageInfo, PageMetadata, RevisionInfo,
};
use crate::repository::PageRepository;

/// Query-time settings: the offset that defines "a day", and the statuses a
/// caller is allowed to see. Every lookup applies the status allow-list;
/// there is no unfiltered path.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub timezone: FixedOffset,
    pub statuses: Vec<String>,
}

impl QueryContext {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            timezone: config.site.timezone_offset()?,
            statuses: config.site.statuses.clone(),
        })
    }
}

pub struct QueryEngine {
    tx: Transaction<'static, Sqlite>,
    repo: PageRepository,
    ctx: QueryContext,
}

impl QueryEngine {
    /// Open an engine over the current index generation.
    pub async fn snapshot(
        pool: &SqlitePool,
        repo: PageRepository,
        ctx: QueryContext,
    ) -> QueryResult<Self> {
        let mut tx = pool.begin().await?;
        // Touch the database so the snapshot is taken now, not at the
        // caller's first query.
        sqlx::query("SELECT 1 FROM records LIMIT 1")
            .fetch_optional(&mut *tx)
            .await?;
        Ok(Self { tx, repo, ctx })
    }

    /// Object store handle for lazy body loads ([`PageBody::get`]).
    pub fn repository(&self) -> &PageRepository {
        &self.repo
    }

    // ============ Page lookups ============

    /// The page whose body lives at `path` in the current tree.
    pub async fn page_by_path(&mut self, path: &str) -> QueryResult<Page> {
        let sql = format!(
            "SELECT * FROM records WHERE kind = 'page' AND page_path = ? AND {} \
             ORDER BY seq ASC LIMIT 1",
            self.status_clause("page_status")
        );
        let mut query = sqlx::query(&sql).bind(path);
        for status in &self.ctx.statuses {
            query = query.bind(status);
        }
        let row = query
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| QueryError::PageNotFound(path.to_string()))?;
        page_from_row(&row)
    }

    /// The page published on `date` (in the context timezone) under `slug`,
    /// optionally pinned to one of its historical revisions.
    pub async fn page(
        &mut self,
        date: NaiveDate,
        slug: &str,
        revision_id: Option<&str>,
    ) -> QueryResult<Page> {
        let row = self.page_row(date, slug).await?;

        let Some(revision_id) = revision_id else {
            return page_from_row(&row);
        };

        let seq: i64 = row.try_get("seq")?;
        let end = self.next_page_seq(seq).await?;
        let revision = self
            .revision_in_group(seq, end, revision_id)
            .await?
            .ok_or_else(|| QueryError::RevisionNotFound {
                slug: slug.to_string(),
                revision_id: revision_id.to_string(),
            })?;
        page_from_revision_row(&revision)
    }

    /// Pages in reverse chronological order, optionally bounded by a date
    /// range (`start` inclusive, `end` exclusive, both at local midnight).
    pub async fn index(
        &mut self,
        page_number: i64,
        page_length: i64,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> QueryResult<(Vec<Page>, PageMetadata)> {
        let mut clauses = format!(
            "kind = 'page' AND {}",
            self.status_clause("page_status")
        );
        if start.is_some() {
            clauses.push_str(" AND page_date >= ?");
        }
        if end.is_some() {
            clauses.push_str(" AND page_date < ?");
        }

        let count_sql = format!("SELECT COUNT(*) FROM records WHERE {}", clauses);
        let select_sql = format!(
            "SELECT * FROM records WHERE {} ORDER BY page_date DESC, seq ASC LIMIT ? OFFSET ?",
            clauses
        );

        let start_ts = start.map(|d| day_window(&self.ctx.timezone, d).0);
        let end_ts = end.map(|d| day_window(&self.ctx.timezone, d).0);

        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        for status in &self.ctx.statuses {
            count_query = count_query.bind(status);
        }
        if let Some(ts) = start_ts {
            count_query = count_query.bind(ts);
        }
        if let Some(ts) = end_ts {
            count_query = count_query.bind(ts);
        }
        let total = count_query.fetch_one(&mut *self.tx).await?;

        let offset = (page_number.max(1) - 1) * page_length;
        let mut select_query = sqlx::query(&select_sql);
        for status in &self.ctx.statuses {
            select_query = select_query.bind(status);
        }
        if let Some(ts) = start_ts {
            select_query = select_query.bind(ts);
        }
        if let Some(ts) = end_ts {
            select_query = select_query.bind(ts);
        }
        let rows = select_query
            .bind(page_length)
            .bind(offset)
            .fetch_all(&mut *self.tx)
            .await?;

        let pages = rows
            .iter()
            .map(page_from_row)
            .collect::<QueryResult<Vec<_>>>()?;
        Ok((pages, PageMetadata::new(total, page_number.max(1), page_length)))
    }

    /// The latest pages, newest first.
    pub async fn recent_pages(
        &mut self,
        page_number: i64,
        page_length: i64,
    ) -> QueryResult<Vec<PageInfo>> {
        self.pages_relative("page_date < ?", "DESC", i64::MAX, page_number, page_length)
            .await
    }

    /// Pages strictly older than `than`, nearest first.
    pub async fn older_pages(
        &mut self,
        than: DateTime<Utc>,
        page_number: i64,
        page_length: i64,
    ) -> QueryResult<Vec<PageInfo>> {
        self.pages_relative(
            "page_date < ?",
            "DESC",
            than.timestamp(),
            page_number,
            page_length,
        )
        .await
    }

    /// Pages strictly newer than `than`, nearest first.
    pub async fn newer_pages(
        &mut self,
        than: DateTime<Utc>,
        page_number: i64,
        page_length: i64,
    ) -> QueryResult<Vec<PageInfo>> {
        self.pages_relative(
            "page_date > ?",
            "ASC",
            than.timestamp(),
            page_number,
            page_length,
        )
        .await
    }

    async fn pages_relative(
        &mut self,
        date_clause: &str,
        order: &str,
        bound: i64,
        page_number: i64,
        page_length: i64,
    ) -> QueryResult<Vec<PageInfo>> {
        let sql = format!(
            "SELECT * FROM records WHERE kind = 'page' AND {} AND {} \
             ORDER BY page_date {}, seq ASC LIMIT ? OFFSET ?",
            date_clause,
            self.status_clause("page_status"),
            order
        );
        let mut query = sqlx::query(&sql).bind(bound);
        for status in &self.ctx.statuses {
            query = query.bind(status);
        }
        let rows = query
            .bind(page_length)
            .bind((page_number.max(1) - 1) * page_length)
            .fetch_all(&mut *self.tx)
            .await?;
        rows.iter().map(page_info_from_row).collect()
    }

    /// Full-text title search over current pages, best match first.
    pub async fn search_titles(
        &mut self,
        needle: &str,
        limit: i64,
    ) -> QueryResult<Vec<PageInfo>> {
        // Quoted per term so query punctuation is literal text, never FTS
        // syntax.
        let needle = fts_quote(needle);
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT records.* FROM records_fts \
             JOIN records ON records.seq = records_fts.seq \
             WHERE records_fts MATCH ? AND records.kind = 'page' AND {} \
             ORDER BY rank LIMIT ?",
            self.status_clause("records.page_status")
        );
        let mut query = sqlx::query(&sql).bind(needle);
        for status in &self.ctx.statuses {
            query = query.bind(status);
        }
        let rows = query.bind(limit).fetch_all(&mut *self.tx).await?;
        rows.iter().map(page_info_from_row).collect()
    }

    // ============ Revisions ============

    /// Revision history of one page, newest commit first, paginated.
    pub async fn history(
        &mut self,
        date: NaiveDate,
        slug: &str,
        page_number: i64,
        page_length: i64,
    ) -> QueryResult<(Vec<RevisionInfo>, PageMetadata)> {
        let row = self.page_row(date, slug).await?;
        let seq: i64 = row.try_get("seq")?;
        let end = self.next_page_seq(seq).await?;

        let count_sql = format!(
            "SELECT COUNT(*) FROM records WHERE kind = 'revision' \
             AND seq > ? AND seq < ? AND {}",
            self.status_clause("revision_status")
        );
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql).bind(seq).bind(end);
        for status in &self.ctx.statuses {
            count_query = count_query.bind(status);
        }
        let total = count_query.fetch_one(&mut *self.tx).await?;

        let select_sql = format!(
            "SELECT * FROM records WHERE kind = 'revision' \
             AND seq > ? AND seq < ? AND {} \
             ORDER BY revision_commit_time DESC, seq ASC LIMIT ? OFFSET ?",
            self.status_clause("revision_status")
        );
        let page_number = page_number.max(1);
        let mut select_query = sqlx::query(&select_sql).bind(seq).bind(end);
        for status in &self.ctx.statuses {
            select_query = select_query.bind(status);
        }
        let rows = select_query
            .bind(page_length)
            .bind((page_number - 1) * page_length)
            .fetch_all(&mut *self.tx)
            .await?;

        let revisions = rows
            .iter()
            .map(revision_info_from_row)
            .collect::<QueryResult<Vec<_>>>()?;
        Ok((revisions, PageMetadata::new(total, page_number, page_length)))
    }

    /// Revisions are identified by their tree hash, the content state the
    /// commit produced.
    async fn revision_in_group(
        &mut self,
        start: i64,
        end: i64,
        revision_id: &str,
    ) -> QueryResult<Option<SqliteRow>> {
        let sql = format!(
            "SELECT * FROM records WHERE kind = 'revision' \
             AND seq > ? AND seq < ? AND revision_tree_id = ? AND {} \
             ORDER BY seq ASC LIMIT 1",
            self.status_clause("revision_status")
        );
        let mut query = sqlx::query(&sql).bind(start).bind(end).bind(revision_id);
        for status in &self.ctx.statuses {
            query = query.bind(status);
        }
        Ok(query.fetch_optional(&mut *self.tx).await?)
    }

    // ============ Attachments ============

    /// Look up one attachment by its subtree hash, wherever it is nested.
    pub async fn attachment(&mut self, id: &str) -> QueryResult<AttachmentInfo> {
        let row = sqlx::query(
            "SELECT * FROM records \
             WHERE kind IN ('page-attachment', 'revision-attachment') \
             AND attachment_id = ? ORDER BY seq ASC LIMIT 1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| QueryError::AttachmentNotFound(id.to_string()))?;
        attachment_from_row(&row)
    }

    /// Attachments of a page's current state, or of one of its revisions.
    pub async fn attachments(
        &mut self,
        date: NaiveDate,
        slug: &str,
        revision_id: Option<&str>,
    ) -> QueryResult<Vec<AttachmentInfo>> {
        let row = self.page_row(date, slug).await?;
        let page_seq: i64 = row.try_get("seq")?;
        let page_end = self.next_page_seq(page_seq).await?;

        let (kind, start, end) = match revision_id {
            None => ("page-attachment", page_seq, page_end),
            Some(revision_id) => {
                let revision = self
                    .revision_in_group(page_seq, page_end, revision_id)
                    .await?
                    .ok_or_else(|| QueryError::RevisionNotFound {
                        slug: slug.to_string(),
                        revision_id: revision_id.to_string(),
                    })?;
                let revision_seq: i64 = revision.try_get("seq")?;
                let end = self.next_group_seq(revision_seq, page_end).await?;
                ("revision-attachment", revision_seq, end)
            }
        };

        let rows = sqlx::query(
            "SELECT * FROM records WHERE kind = ? AND seq > ? AND seq < ? ORDER BY seq ASC",
        )
        .bind(kind)
        .bind(start)
        .bind(end)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter().map(attachment_from_row).collect()
    }

    // ============ Group boundaries ============

    /// First record after `after` that starts a new page group.
    async fn next_page_seq(&mut self, after: i64) -> QueryResult<i64> {
        let next: Option<i64> = sqlx::query_scalar(
            "SELECT seq FROM records WHERE kind = 'page' AND seq > ? ORDER BY seq LIMIT 1",
        )
        .bind(after)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(next.unwrap_or(i64::MAX))
    }

    /// First record after `after` at revision level or above, capped by the
    /// enclosing page group.
    async fn next_group_seq(&mut self, after: i64, page_end: i64) -> QueryResult<i64> {
        let next: Option<i64> = sqlx::query_scalar(
            "SELECT seq FROM records WHERE kind IN ('page', 'revision') AND seq > ? \
             ORDER BY seq LIMIT 1",
        )
        .bind(after)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(next.unwrap_or(i64::MAX).min(page_end))
    }

    async fn page_row(&mut self, date: NaiveDate, slug: &str) -> QueryResult<SqliteRow> {
        let (start, end) = day_window(&self.ctx.timezone, date);
        let sql = format!(
            "SELECT * FROM records WHERE kind = 'page' AND page_slug = ? \
             AND page_date >= ? AND page_date < ? AND {} ORDER BY seq ASC LIMIT 1",
            self.status_clause("page_status")
        );
        let mut query = sqlx::query(&sql).bind(slug).bind(start).bind(end);
        for status in &self.ctx.statuses {
            query = query.bind(status);
        }
        query
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| QueryError::PageNotFound(format!("{}/{}", date, slug)))
    }

    fn status_clause(&self, column: &str) -> String {
        let marks = vec!["?"; self.ctx.statuses.len()].join(", ");
        format!("{} IN ({})", column, marks)
    }
}

/// Turn a user query into an FTS5 MATCH expression: every whitespace-split
/// term becomes a quoted phrase, with embedded quotes doubled.
fn fts_quote(needle: &str) -> String {
    needle
        .split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

/// `[start, end)` unix-second window of one calendar day in `tz`.
fn day_window(tz: &FixedOffset, date: NaiveDate) -> (i64, i64) {
    let midnight_utc = date.and_time(NaiveTime::MIN).and_utc().timestamp();
    let start = midnight_utc - i64::from(tz.local_minus_utc());
    (start, start + 86_400)
}

fn page_from_row(row: &SqliteRow) -> QueryResult<Page> {
    let info = page_info_from_row(row)?;
    let body = PageBody::new(info.blob_id.clone());
    let rendered_html: Option<String> = row.try_get("rendered_html")?;
    Ok(Page {
        info,
        body,
        rendered_html,
    })
}

/// A revision presented through the page shape, for "view page as of
/// revision X" lookups.
fn page_from_revision_row(row: &SqliteRow) -> QueryResult<Page> {
    let revision = revision_info_from_row(row)?;
    let rendered_html: Option<String> = row.try_get("rendered_html")?;
    let body = PageBody::new(revision.blob_id.clone());
    Ok(Page {
        info: PageInfo {
            seq: revision.seq,
            date: revision.date,
            slug: revision.slug,
            title: revision.title,
            status: revision.status,
            path: revision.path,
            blob_id: revision.blob_id,
        },
        body,
        rendered_html,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_window_utc() {
        let tz = FixedOffset::east_opt(0).unwrap();
        let date = NaiveDate::from_ymd_opt(2011, 11, 11).unwrap();
        let (start, end) = day_window(&tz, date);
        assert_eq!(end - start, 86_400);
        assert_eq!(
            DateTime::from_timestamp(start, 0).unwrap().to_rfc3339(),
            "2011-11-11T00:00:00+00:00"
        );
    }

    #[test]
    fn test_fts_quote_wraps_every_term() {
        assert_eq!(fts_quote("sample page"), "\"sample\" \"page\"");
        assert_eq!(fts_quote("it\"s"), "\"it\"\"s\"");
        assert_eq!(fts_quote("NEAR("), "\"NEAR(\"");
        assert_eq!(fts_quote("   "), "");
    }

    #[test]
    fn test_day_window_negative_offset() {
        // Midnight at -08:00 is 08:00 UTC.
        let tz = FixedOffset::east_opt(-8 * 3600).unwrap();
        let date = NaiveDate::from_ymd_opt(2012, 12, 12).unwrap();
        let (start, _) = day_window(&tz, date);
        assert_eq!(
            DateTime::from_timestamp(start, 0).unwrap().to_rfc3339(),
            "2012-12-12T08:00:00+00:00"
        );
    }
}
