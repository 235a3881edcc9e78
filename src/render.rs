//! Markup rendering.
//!
//! Turns a page's markdown source into an HTML fragment. Rendering is a
//! presentation concern kept out of the index proper; the builder only calls
//! in here when precomputed HTML is enabled, otherwise callers render on
//! demand from the lazy body.

use pulldown_cmark::{html, CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use syntect::html::{ClassStyle, ClassedHTMLGenerator};
use syntect::parsing::SyntaxSet;
use syntect::util::LinesWithEndings;

use crate::config::RenderConfig;

pub struct HtmlRenderer {
    syntax_set: SyntaxSet,
    initial_heading_level: u8,
    highlight: bool,
    smart_quotes: bool,
}

impl HtmlRenderer {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            syntax_set: SyntaxSet::load_defaults_newlines(),
            initial_heading_level: config.initial_heading_level,
            highlight: config.highlight,
            smart_quotes: config.smart_quotes,
        }
    }

    /// Render markdown source to an HTML fragment.
    ///
    /// Front matter is dropped, headings are shifted so the document's `#`
    /// title lands at the configured level, and fenced code blocks are
    /// highlighted with CSS classes when a syntax is recognized.
    pub fn render(&self, source: &str) -> String {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_YAML_STYLE_METADATA_BLOCKS);
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_FOOTNOTES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        if self.smart_quotes {
            options.insert(Options::ENABLE_SMART_PUNCTUATION);
        }

        let parser = Parser::new_ext(source, options);

        let mut events: Vec<Event> = Vec::new();
        let mut in_metadata = false;
        let mut code_lang: Option<String> = None;
        let mut code_text = String::new();

        for event in parser {
            if in_metadata {
                if matches!(event, Event::End(TagEnd::MetadataBlock(_))) {
                    in_metadata = false;
                }
                continue;
            }
            if let Some(lang) = &code_lang {
                match event {
                    Event::Text(text) => code_text.push_str(&text),
                    Event::End(TagEnd::CodeBlock) => {
                        let lang = lang.clone();
                        events.push(Event::Html(
                            self.highlighted_block(&lang, &code_text).into(),
                        ));
                        code_lang = None;
                        code_text.clear();
                    }
                    _ => {}
                }
                continue;
            }

            match event {
                Event::Start(Tag::MetadataBlock(_)) => in_metadata = true,
                Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(lang)))
                    if self.highlight && !lang.is_empty() =>
                {
                    code_lang = Some(lang.to_string());
                    code_text.clear();
                }
                Event::Start(Tag::Heading {
                    level,
                    id,
                    classes,
                    attrs,
                }) => {
                    events.push(Event::Start(Tag::Heading {
                        level: self.shift_heading(level),
                        id,
                        classes,
                        attrs,
                    }));
                }
                Event::End(TagEnd::Heading(level)) => {
                    events.push(Event::End(TagEnd::Heading(self.shift_heading(level))));
                }
                other => events.push(other),
            }
        }

        let mut out = String::with_capacity(source.len() * 2);
        html::push_html(&mut out, events.into_iter());
        out
    }

    fn shift_heading(&self, level: HeadingLevel) -> HeadingLevel {
        let n = level as usize + self.initial_heading_level.saturating_sub(1) as usize;
        match n {
            1 => HeadingLevel::H1,
            2 => HeadingLevel::H2,
            3 => HeadingLevel::H3,
            4 => HeadingLevel::H4,
            5 => HeadingLevel::H5,
            _ => HeadingLevel::H6,
        }
    }

    /// Class-based highlighting so the page's stylesheet picks the colors.
    /// Unknown languages fall back to a plain code block.
    fn highlighted_block(&self, lang: &str, code: &str) -> String {
        let syntax = self
            .syntax_set
            .find_syntax_by_token(lang)
            .or_else(|| self.syntax_set.find_syntax_by_extension(lang));

        let Some(syntax) = syntax else {
            return plain_block(lang, code);
        };

        let mut generator = ClassedHTMLGenerator::new_with_class_style(
            syntax,
            &self.syntax_set,
            ClassStyle::Spaced,
        );
        for line in LinesWithEndings::from(code) {
            if generator
                .parse_html_for_line_which_includes_newline(line)
                .is_err()
            {
                return plain_block(lang, code);
            }
        }
        format!(
            "<pre class=\"highlight\"><code class=\"language-{}\">{}</code></pre>\n",
            escape_attr(lang),
            generator.finalize()
        )
    }
}

fn plain_block(lang: &str, code: &str) -> String {
    format!(
        "<pre><code class=\"language-{}\">{}</code></pre>\n",
        escape_attr(lang),
        escape_text(code)
    )
}

fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn escape_attr(s: &str) -> String {
    escape_text(s).replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RenderConfig;

    fn renderer() -> HtmlRenderer {
        HtmlRenderer::new(&RenderConfig {
            precompute: false,
            initial_heading_level: 2,
            highlight: true,
            smart_quotes: true,
        })
    }

    #[test]
    fn test_title_heading_is_shifted() {
        let html = renderer().render("# Title\n\nBody.\n");
        assert!(html.contains("<h2>Title</h2>"), "got: {}", html);
        assert!(html.contains("<p>Body.</p>"));
    }

    #[test]
    fn test_front_matter_is_dropped() {
        let html = renderer().render("---\ndate: 2011-11-11\nstatus: published\n---\n\n# T\n");
        assert!(!html.contains("2011-11-11"), "got: {}", html);
        assert!(!html.contains("status"));
    }

    #[test]
    fn test_fenced_code_gets_classes() {
        let html = renderer().render("# T\n\n```rs\nlet x = 1;\n```\n");
        assert!(html.contains("language-rs"), "got: {}", html);
    }

    #[test]
    fn test_unknown_language_falls_back_to_plain() {
        let html = renderer().render("```nosuchlang\nstuff < here\n```\n");
        assert!(html.contains("language-nosuchlang"), "got: {}", html);
        assert!(html.contains("stuff &lt; here"));
    }

    #[test]
    fn test_smart_quotes() {
        let html = renderer().render("\"quoted\"\n");
        assert!(html.contains('\u{201c}'), "got: {}", html);
    }
}
