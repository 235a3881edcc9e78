//! CLI command runners.
//!
//! Each `run_*` function is one subcommand: load what it needs, call into
//! the builder or query engine, and print to stdout. Exit-worthy problems
//! propagate as errors; lookups that simply find nothing print a message
//! and return cleanly.

use anyhow::{bail, Result};
use chrono::NaiveDate;

use crate::config::Config;
use crate::db;
use crate::error::QueryError;
use crate::indexer;
use crate::models::{AttachmentInfo, PageInfo, PageMetadata, RevisionInfo};
use crate::query::{QueryContext, QueryEngine};
use crate::render::HtmlRenderer;
use crate::repository::PageRepository;
use crate::schema;

pub async fn run_init(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    schema::run_migrations(&pool).await?;
    pool.close().await;
    println!("Index initialized successfully.");
    Ok(())
}

pub async fn run_rebuild(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    schema::run_migrations(&pool).await?;
    let repo = PageRepository::open(&config.repo.path)?;

    let stats = indexer::rebuild(config, &pool, &repo).await?;
    pool.close().await;

    println!("Rebuild complete.");
    println!("  pages:       {}", stats.pages);
    if stats.pages_skipped > 0 {
        println!("  skipped:     {}", stats.pages_skipped);
    }
    println!("  revisions:   {}", stats.revisions);
    println!("  attachments: {}", stats.attachments);
    Ok(())
}

pub async fn run_page(
    config: &Config,
    date: &str,
    slug: &str,
    revision: Option<&str>,
    html: bool,
) -> Result<()> {
    let date = parse_cli_date(date)?;
    let (pool, mut engine) = open_engine(config).await?;

    let mut page = match engine.page(date, slug, revision).await {
        Ok(page) => page,
        Err(err @ (QueryError::PageNotFound(_) | QueryError::RevisionNotFound { .. })) => {
            println!("{}", err);
            drop(engine);
            pool.close().await;
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    println!("--- Page ---");
    print_page_info(&page.info);
    println!();

    if html {
        match page.rendered_html.take() {
            Some(rendered) => println!("{}", rendered),
            None => {
                let body = page.body.get(engine.repository())?.to_string();
                let renderer = HtmlRenderer::new(&config.render);
                println!("{}", renderer.render(&body));
            }
        }
    } else {
        println!("{}", page.body.get(engine.repository())?);
    }

    drop(engine);
    pool.close().await;
    Ok(())
}

pub async fn run_list(
    config: &Config,
    page_number: i64,
    page_length: i64,
    start: Option<&str>,
    end: Option<&str>,
) -> Result<()> {
    let start = start.map(parse_cli_date).transpose()?;
    let end = end.map(parse_cli_date).transpose()?;
    let (pool, mut engine) = open_engine(config).await?;

    let (pages, meta) = engine.index(page_number, page_length, start, end).await?;
    if pages.is_empty() {
        println!("No pages.");
    } else {
        for page in &pages {
            print_page_line(&page.info);
        }
        print_page_metadata(&meta);
    }

    drop(engine);
    pool.close().await;
    Ok(())
}

pub async fn run_history(
    config: &Config,
    date: &str,
    slug: &str,
    page_number: i64,
    page_length: i64,
) -> Result<()> {
    let date = parse_cli_date(date)?;
    let (pool, mut engine) = open_engine(config).await?;

    let result = engine.history(date, slug, page_number, page_length).await;
    match result {
        Ok((revisions, meta)) => {
            if revisions.is_empty() {
                println!("No revisions.");
            } else {
                for revision in &revisions {
                    print_revision(revision);
                }
                print_page_metadata(&meta);
            }
        }
        Err(err @ QueryError::PageNotFound(_)) => println!("{}", err),
        Err(err) => return Err(err.into()),
    }

    drop(engine);
    pool.close().await;
    Ok(())
}

pub async fn run_attachment(config: &Config, id: &str, save: Option<&str>) -> Result<()> {
    let (pool, mut engine) = open_engine(config).await?;

    let attachment = match engine.attachment(id).await {
        Ok(attachment) => attachment,
        Err(err @ QueryError::AttachmentNotFound(_)) => {
            println!("{}", err);
            drop(engine);
            pool.close().await;
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    print_attachment(&attachment);

    if let Some(path) = save {
        let oid = git2::Oid::from_str(&attachment.data_blob_id)?;
        let bytes = engine.repository().load_blob(oid)?;
        std::fs::write(path, &bytes[..])?;
        println!("Wrote {} bytes to {}", bytes.len(), path);
    }

    drop(engine);
    pool.close().await;
    Ok(())
}

pub async fn run_search(config: &Config, query: &str, limit: i64) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }
    let (pool, mut engine) = open_engine(config).await?;

    let pages = engine.search_titles(query, limit).await?;
    if pages.is_empty() {
        println!("No results.");
    } else {
        for page in &pages {
            print_page_line(page);
        }
    }

    drop(engine);
    pool.close().await;
    Ok(())
}

async fn open_engine(config: &Config) -> Result<(sqlx::SqlitePool, QueryEngine)> {
    let pool = db::connect(config).await?;
    let repo = PageRepository::open(&config.repo.path)?;
    let ctx = QueryContext::from_config(config)?;
    let engine = QueryEngine::snapshot(&pool, repo, ctx).await?;
    Ok((pool, engine))
}

fn parse_cli_date(s: &str) -> Result<NaiveDate> {
    match NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d") {
        Ok(date) => Ok(date),
        Err(_) => bail!("invalid date '{}': expected YYYY-MM-DD", s),
    }
}

fn print_page_info(info: &PageInfo) {
    println!("title:   {}", info.title);
    println!("slug:    {}", info.slug);
    println!("date:    {}", info.date.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("status:  {}", info.status);
    println!("path:    {}", info.path);
    println!("blob:    {}", info.blob_id);
}

fn print_page_line(info: &PageInfo) {
    println!(
        "{}  {:<12} {}",
        info.date.format("%Y-%m-%d"),
        info.status,
        info.title
    );
}

fn print_revision(revision: &RevisionInfo) {
    println!("--- Revision {} ---", revision.tree_id);
    println!("commit:    {}", revision.commit_id);
    println!("title:     {}", revision.title);
    println!("status:    {}", revision.status);
    println!("author:    {}", revision.author);
    println!(
        "committed: {}",
        revision.commit_time.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!("path:      {}", revision.path);
    let subject = revision.message.lines().next().unwrap_or("");
    println!("message:   {}", subject);
    println!();
}

fn print_attachment(attachment: &AttachmentInfo) {
    println!("--- Attachment ---");
    println!("id:           {}", attachment.id);
    println!("content_type: {}", attachment.content_type);
    println!("disposition:  {}", attachment.content_disposition);
    println!("length:       {}", attachment.content_length);
    println!("data_blob:    {}", attachment.data_blob_id);
    println!("meta_blob:    {}", attachment.metadata_blob_id);
}

fn print_page_metadata(meta: &PageMetadata) {
    println!();
    println!(
        "page {} of {} ({} total)",
        meta.page_number, meta.page_count, meta.total
    );
}
