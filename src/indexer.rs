//! Index builder.
//!
//! Rebuilds the whole index from the object store in one transaction:
//! delete everything, then insert every page group in order. Grouped write
//! order is what encodes the hierarchy (see `schema`), so nothing here may
//! interleave records from different pages. If any step fails the
//! transaction is dropped and the previously committed generation stays
//! live.

use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, info, warn};

use crate::config::{Config, MalformedPagePolicy};
use crate::document::{self, AttachmentDocument, PageDocument};
use crate::error::{BuildError, BuildResult};
use crate::render::HtmlRenderer;
use crate::repository::{
    AttachmentRef, PageHead, PageRepository, RevisionCommit, ATTACHMENTS_TREE, ATTACHMENT_METADATA,
};
use crate::schema::RecordKind;

/// Counts from one completed rebuild.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuildStats {
    pub pages: usize,
    pub pages_skipped: usize,
    pub revisions: usize,
    pub attachments: usize,
}

/// Rebuild the index from the configured ref.
///
/// Returns the stats of the new generation, or the error that aborted it.
pub async fn rebuild(
    config: &Config,
    pool: &SqlitePool,
    repo: &PageRepository,
) -> BuildResult<BuildStats> {
    let refname = &config.repo.refname;
    let renderer = config
        .render
        .precompute
        .then(|| HtmlRenderer::new(&config.render));

    info!(refname = %refname, "rebuilding index");

    let heads = repo.list_pages(refname)?;

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM records").execute(&mut *tx).await?;
    sqlx::query("DELETE FROM records_fts")
        .execute(&mut *tx)
        .await?;

    let mut stats = BuildStats::default();

    for head in heads {
        let head = match head {
            Ok(head) => head,
            Err(err) => {
                skip_or_abort(config, err, &mut stats)?;
                continue;
            }
        };

        let doc = match load_page_document(repo, &head) {
            Ok(doc) => doc,
            Err(err) => {
                skip_or_abort(config, err, &mut stats)?;
                continue;
            }
        };

        write_page_group(&mut tx, config, repo, renderer.as_ref(), &head, &doc, &mut stats)
            .await?;
        stats.pages += 1;
    }

    tx.commit().await?;

    info!(
        pages = stats.pages,
        pages_skipped = stats.pages_skipped,
        revisions = stats.revisions,
        attachments = stats.attachments,
        "index rebuilt"
    );

    Ok(stats)
}

/// Apply the malformed-page policy. Only content defects are skippable;
/// infrastructure failures always abort.
fn skip_or_abort(config: &Config, err: BuildError, stats: &mut BuildStats) -> BuildResult<()> {
    let malformation = matches!(
        err,
        BuildError::Structure { .. }
            | BuildError::Parse { .. }
            | BuildError::MissingTitle { .. }
            | BuildError::MissingMetadata { .. }
    );
    if malformation && config.build.on_malformed_page == MalformedPagePolicy::Skip {
        warn!(error = %err, "skipping malformed page");
        stats.pages_skipped += 1;
        Ok(())
    } else {
        Err(err)
    }
}

fn load_page_document(repo: &PageRepository, head: &PageHead) -> BuildResult<PageDocument> {
    let bytes = repo.load_blob(head.body_blob_id)?;
    document::extract_page(&bytes, &head.body_path)
}

/// Write one page and everything nested under it, in group order:
/// page, boundary marker, page attachments, then each revision followed by
/// its own marker and attachments.
async fn write_page_group(
    tx: &mut Transaction<'_, Sqlite>,
    config: &Config,
    repo: &PageRepository,
    renderer: Option<&HtmlRenderer>,
    head: &PageHead,
    doc: &PageDocument,
    stats: &mut BuildStats,
) -> BuildResult<()> {
    debug!(slug = %doc.slug, path = %head.dir_path, "indexing page");

    let rendered = renderer.map(|r| r.render(&doc.source));
    let seq = insert_page(tx, head, doc, rendered).await?;
    insert_title(tx, seq, &doc.title).await?;
    insert_marker(tx, RecordKind::PageDummyChild).await?;

    for attachment in repo.load_attachments(head.dir_tree_id, &head.dir_path)? {
        let meta = load_attachment_document(repo, &attachment, &head.dir_path)?;
        insert_attachment(tx, RecordKind::PageAttachment, &attachment, &meta).await?;
        stats.attachments += 1;
    }

    // Revision parse failures are never skippable: history that no longer
    // extracts means the index would silently lose revisions. The walk is
    // consumed one commit at a time; history can be arbitrarily long.
    for revision in repo.history(&config.repo.refname, &head.dir_path)? {
        let revision = revision?;
        let source = repo.revision_source(&revision)?;
        let bytes = repo.load_blob(source.body_blob_id)?;
        let rdoc = document::extract_page(&bytes, &revision.body_path)?;

        let rendered = renderer.map(|r| r.render(&rdoc.source));
        let seq = insert_revision(tx, &revision, &rdoc, source.body_blob_id, rendered).await?;
        insert_title(tx, seq, &rdoc.title).await?;
        insert_marker(tx, RecordKind::RevisionDummyChild).await?;

        for attachment in source.attachments {
            let meta = load_attachment_document(repo, &attachment, &revision.dir_path)?;
            insert_attachment(tx, RecordKind::RevisionAttachment, &attachment, &meta).await?;
            stats.attachments += 1;
        }

        stats.revisions += 1;
    }

    Ok(())
}

fn load_attachment_document(
    repo: &PageRepository,
    attachment: &AttachmentRef,
    owner_path: &str,
) -> BuildResult<AttachmentDocument> {
    let path = format!(
        "{}/{}/{}/{}",
        owner_path, ATTACHMENTS_TREE, attachment.name, ATTACHMENT_METADATA
    );
    let bytes = repo.load_blob(attachment.metadata_blob_id)?;
    document::extract_attachment(&bytes, &path)
}

// ============ Record inserts ============

async fn insert_page(
    tx: &mut Transaction<'_, Sqlite>,
    head: &PageHead,
    doc: &PageDocument,
    rendered: Option<String>,
) -> BuildResult<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO records (
            kind, page_date, page_slug, page_title, page_status,
            page_path, page_blob_id, rendered_html
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(RecordKind::Page.as_str())
    .bind(doc.date.timestamp())
    .bind(&doc.slug)
    .bind(&doc.title)
    .bind(&doc.status)
    .bind(&head.body_path)
    .bind(head.body_blob_id.to_string())
    .bind(rendered)
    .execute(&mut **tx)
    .await?;
    Ok(result.last_insert_rowid())
}

async fn insert_revision(
    tx: &mut Transaction<'_, Sqlite>,
    revision: &RevisionCommit,
    doc: &PageDocument,
    body_blob_id: git2::Oid,
    rendered: Option<String>,
) -> BuildResult<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO records (
            kind, revision_date, revision_slug, revision_title, revision_status,
            revision_path, revision_blob_id, revision_commit_id, revision_tree_id,
            revision_author, revision_committer, revision_author_time,
            revision_commit_time, revision_message, rendered_html
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(RecordKind::Revision.as_str())
    .bind(doc.date.timestamp())
    .bind(&doc.slug)
    .bind(&doc.title)
    .bind(&doc.status)
    .bind(&revision.body_path)
    .bind(body_blob_id.to_string())
    .bind(revision.commit_id.to_string())
    .bind(revision.tree_id.to_string())
    .bind(&revision.author)
    .bind(&revision.committer)
    .bind(revision.author_time.timestamp())
    .bind(revision.commit_time.timestamp())
    .bind(&revision.message)
    .bind(rendered)
    .execute(&mut **tx)
    .await?;
    Ok(result.last_insert_rowid())
}

async fn insert_attachment(
    tx: &mut Transaction<'_, Sqlite>,
    kind: RecordKind,
    attachment: &AttachmentRef,
    doc: &AttachmentDocument,
) -> BuildResult<()> {
    sqlx::query(
        r#"
        INSERT INTO records (
            kind, attachment_id, attachment_data_blob_id,
            attachment_metadata_blob_id, attachment_content_type,
            attachment_content_disposition, attachment_content_length
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(kind.as_str())
    .bind(attachment.tree_id.to_string())
    .bind(attachment.data_blob_id.to_string())
    .bind(attachment.metadata_blob_id.to_string())
    .bind(&doc.content_type)
    .bind(&doc.content_disposition)
    .bind(attachment.data_len as i64)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_marker(tx: &mut Transaction<'_, Sqlite>, kind: RecordKind) -> BuildResult<()> {
    sqlx::query("INSERT INTO records (kind) VALUES (?)")
        .bind(kind.as_str())
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn insert_title(
    tx: &mut Transaction<'_, Sqlite>,
    seq: i64,
    title: &str,
) -> BuildResult<()> {
    sqlx::query("INSERT INTO records_fts (seq, title) VALUES (?, ?)")
        .bind(seq)
        .bind(title)
        .execute(&mut **tx)
        .await?;
    Ok(())
}
