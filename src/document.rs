//! Document extraction.
//!
//! Page bodies and attachment metadata documents are Markdown with a YAML
//! front-matter block. Extraction stops at structured metadata: the title is
//! the first top-level heading, declared fields come from the front matter,
//! and unknown fields pass through opaquely. HTML rendering is the
//! renderer's job (`render`), not this module's.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use pulldown_cmark::{Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use std::collections::BTreeMap;

use crate::error::{BuildError, BuildResult};
use crate::slug::slugify;

/// A parsed markup document: structured metadata plus the raw source.
#[derive(Debug, Clone)]
pub struct Document {
    title: Option<String>,
    metadata: BTreeMap<String, String>,
    source: String,
}

impl Document {
    /// Text of the first top-level heading.
    pub fn title(&self, path: &str) -> BuildResult<&str> {
        self.title
            .as_deref()
            .ok_or_else(|| BuildError::MissingTitle { path: path.into() })
    }

    /// The declared front-matter fields, unknown keys included.
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    fn required_field(&self, path: &str, field: &str) -> BuildResult<&str> {
        self.metadata
            .get(field)
            .map(String::as_str)
            .ok_or_else(|| BuildError::MissingMetadata {
                path: path.into(),
                field: field.into(),
            })
    }
}

/// Parse raw blob bytes into a [`Document`].
///
/// Fails with `Parse` on non-UTF-8 input or an undecodable front-matter
/// block. A missing front matter is not a parse error; required-field checks
/// happen in [`extract_page`] / [`extract_attachment`].
pub fn parse(bytes: &[u8], path: &str) -> BuildResult<Document> {
    let source = std::str::from_utf8(bytes)
        .map_err(|e| BuildError::parse(path, format!("not valid UTF-8: {}", e)))?
        .to_string();

    let mut options = Options::empty();
    options.insert(Options::ENABLE_YAML_STYLE_METADATA_BLOCKS);
    let parser = Parser::new_ext(&source, options);

    let mut metadata_text = String::new();
    let mut in_metadata = false;

    let mut title: Option<String> = None;
    let mut heading_text = String::new();
    let mut in_h1 = false;

    for event in parser {
        match event {
            Event::Start(Tag::MetadataBlock(_)) => in_metadata = true,
            Event::End(TagEnd::MetadataBlock(_)) => in_metadata = false,
            Event::Start(Tag::Heading {
                level: HeadingLevel::H1,
                ..
            }) if title.is_none() => {
                in_h1 = true;
                heading_text.clear();
            }
            Event::End(TagEnd::Heading(HeadingLevel::H1)) if in_h1 => {
                in_h1 = false;
                title = Some(heading_text.trim().to_string());
            }
            Event::Text(text) | Event::Code(text) => {
                if in_metadata {
                    metadata_text.push_str(&text);
                } else if in_h1 {
                    heading_text.push_str(&text);
                }
            }
            _ => {}
        }
    }

    let metadata = if metadata_text.trim().is_empty() {
        BTreeMap::new()
    } else {
        decode_front_matter(&metadata_text, path)?
    };

    Ok(Document {
        title: title.filter(|t| !t.is_empty()),
        metadata,
        source,
    })
}

fn decode_front_matter(text: &str, path: &str) -> BuildResult<BTreeMap<String, String>> {
    let raw: BTreeMap<String, serde_yaml::Value> = serde_yaml::from_str(text)
        .map_err(|e| BuildError::parse(path, format!("bad front matter: {}", e)))?;

    let mut fields = BTreeMap::new();
    for (key, value) in raw {
        let value = match value {
            serde_yaml::Value::String(s) => s,
            serde_yaml::Value::Number(n) => n.to_string(),
            serde_yaml::Value::Bool(b) => b.to_string(),
            other => {
                return Err(BuildError::parse(
                    path,
                    format!("front matter field '{}' is not a scalar: {:?}", key, other),
                ))
            }
        };
        fields.insert(key, value);
    }
    Ok(fields)
}

/// Everything the index needs from one page (or revision) body.
#[derive(Debug, Clone)]
pub struct PageDocument {
    pub title: String,
    pub slug: String,
    pub date: DateTime<FixedOffset>,
    pub status: String,
    pub metadata: BTreeMap<String, String>,
    pub source: String,
}

/// Extract a page body: title, slug, required `date` and `status` fields.
pub fn extract_page(bytes: &[u8], path: &str) -> BuildResult<PageDocument> {
    let doc = parse(bytes, path)?;
    let title = doc.title(path)?.to_string();
    let slug = slugify(&title);
    let date = parse_date(doc.required_field(path, "date")?, path)?;
    let status = doc.required_field(path, "status")?.to_string();

    Ok(PageDocument {
        title,
        slug,
        date,
        status,
        metadata: doc.metadata.clone(),
        source: doc.source,
    })
}

/// Declared attachment properties from a `metadata.md` document.
#[derive(Debug, Clone)]
pub struct AttachmentDocument {
    pub content_type: String,
    pub content_disposition: String,
}

/// Extract attachment metadata. Both fields carry defaults; an attachment
/// metadata document with no front matter at all is acceptable.
pub fn extract_attachment(bytes: &[u8], path: &str) -> BuildResult<AttachmentDocument> {
    let doc = parse(bytes, path)?;
    let metadata = doc.metadata();

    Ok(AttachmentDocument {
        content_type: metadata
            .get("content-type")
            .cloned()
            .unwrap_or_else(|| "application/octet-stream".to_string()),
        content_disposition: metadata
            .get("content-disposition")
            .cloned()
            .unwrap_or_else(|| "inline".to_string()),
    })
}

/// Parse a declared timestamp. Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS ±HH:MM`,
/// and a bare `YYYY-MM-DD` (taken as midnight UTC).
pub fn parse_date(value: &str, path: &str) -> BuildResult<DateTime<FixedOffset>> {
    let value = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt);
    }
    if let Ok(dt) = DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S %z") {
        return Ok(dt);
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN).and_utc().fixed_offset());
    }

    // Present but unusable gets the same treatment as absent: the build must
    // not publish a page it cannot place in time.
    Err(BuildError::MissingMetadata {
        path: path.into(),
        field: "date".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
---
date: 2011-11-11T00:00:00-08:00
status: published
author: someone
---

# Sample Page

Body text here.
";

    #[test]
    fn test_extract_page_fields() {
        let page = extract_page(SAMPLE.as_bytes(), "page/sample-page/page.md").unwrap();
        assert_eq!(page.title, "Sample Page");
        assert_eq!(page.slug, "sample-page");
        assert_eq!(page.status, "published");
        assert_eq!(page.date.to_rfc3339(), "2011-11-11T00:00:00-08:00");
        assert_eq!(page.metadata.get("author").unwrap(), "someone");
    }

    #[test]
    fn test_missing_title_is_an_error() {
        let src = "---\ndate: 2011-11-11\nstatus: published\n---\n\nNo heading.\n";
        let err = extract_page(src.as_bytes(), "page/x/page.md").unwrap_err();
        assert!(matches!(err, BuildError::MissingTitle { .. }));
    }

    #[test]
    fn test_missing_date_is_an_error() {
        let src = "---\nstatus: published\n---\n\n# Title\n";
        let err = extract_page(src.as_bytes(), "page/x/page.md").unwrap_err();
        match err {
            BuildError::MissingMetadata { field, .. } => assert_eq!(field, "date"),
            other => panic!("expected MissingMetadata, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_status_is_an_error() {
        let src = "---\ndate: 2011-11-11\n---\n\n# Title\n";
        let err = extract_page(src.as_bytes(), "page/x/page.md").unwrap_err();
        match err {
            BuildError::MissingMetadata { field, .. } => assert_eq!(field, "status"),
            other => panic!("expected MissingMetadata, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_date_is_an_error() {
        let src = "---\ndate: eleventy-first\nstatus: published\n---\n\n# Title\n";
        let err = extract_page(src.as_bytes(), "page/x/page.md").unwrap_err();
        assert!(matches!(err, BuildError::MissingMetadata { .. }));
    }

    #[test]
    fn test_non_utf8_is_a_parse_error() {
        let err = parse(&[0xff, 0xfe, 0x00], "page/x/page.md").unwrap_err();
        assert!(matches!(err, BuildError::Parse { .. }));
    }

    #[test]
    fn test_unknown_fields_pass_through() {
        let src = "---\ndate: 2011-11-11\nstatus: draft\nx-custom: kept\n---\n\n# T\n";
        let page = extract_page(src.as_bytes(), "p").unwrap();
        assert_eq!(page.metadata.get("x-custom").unwrap(), "kept");
    }

    #[test]
    fn test_date_formats() {
        let p = "p";
        assert_eq!(
            parse_date("2012-12-12 08:30:00 +0100", p).unwrap().to_rfc3339(),
            "2012-12-12T08:30:00+01:00"
        );
        assert_eq!(
            parse_date("2012-12-12", p).unwrap().to_rfc3339(),
            "2012-12-12T00:00:00+00:00"
        );
    }

    #[test]
    fn test_attachment_defaults() {
        let doc = extract_attachment(b"# attach.1\n", "page/x/attachment/a/metadata.md").unwrap();
        assert_eq!(doc.content_type, "application/octet-stream");
        assert_eq!(doc.content_disposition, "inline");
    }

    #[test]
    fn test_attachment_declared_fields() {
        let src = "---\ncontent-type: image/png\ncontent-disposition: attachment\n---\n";
        let doc = extract_attachment(src.as_bytes(), "m").unwrap();
        assert_eq!(doc.content_type, "image/png");
        assert_eq!(doc.content_disposition, "attachment");
    }

    #[test]
    fn test_first_h1_wins() {
        let src = "---\ndate: 2011-11-11\nstatus: published\n---\n\n# First\n\n# Second\n";
        let page = extract_page(src.as_bytes(), "p").unwrap();
        assert_eq!(page.title, "First");
    }
}
