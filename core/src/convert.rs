//! Markdown to HTML conversion.
//!
//! The orchestrator hands every block update to a [`Converter`] and awaits
//! the result. Converters see the block's full accumulated text each time and
//! must not keep parse state between calls: the same converter is invoked
//! with growing prefixes of one block while other blocks are in flight.
//!
//! # Provided converters
//!
//! - [`MarkdownConverter`] (feature `pulldown`): CommonMark plus tables,
//!   strikethrough, task lists and footnotes via `pulldown-cmark`.
//! - [`FnConverter`]: wraps a synchronous closure.
//! - [`DialectConverter`]: decorator that renders fenced blocks of one
//!   language through a custom function and delegates everything else.
//!
//! Completeness is always judged with [`scan::fences_balanced`], the same rule
//! the chunker applies.

use std::borrow::Cow;
use std::future::{self, Future};
use std::rc::Rc;

use crate::ConvertError;
use crate::scan;

/// Output of one conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Conversion {
    /// Rendered HTML for the whole block.
    pub html: String,
    /// Whether the markdown had balanced fences.
    pub is_complete: bool,
}

impl Conversion {
    /// Build a conversion, deriving completeness from `markdown`.
    pub fn new(html: impl Into<String>, markdown: &str) -> Self {
        Self {
            html: html.into(),
            is_complete: scan::fences_balanced(markdown),
        }
    }
}

/// Converts a block's markdown into renderable output.
///
/// Conversions run on a single-threaded executor, so returned futures need
/// not be `Send`.
pub trait Converter {
    /// Convert the full text of a block.
    fn convert(&self, markdown: &str) -> impl Future<Output = Result<Conversion, ConvertError>>;
}

impl<C: Converter + ?Sized> Converter for Rc<C> {
    fn convert(&self, markdown: &str) -> impl Future<Output = Result<Conversion, ConvertError>> {
        (**self).convert(markdown)
    }
}

/// A converter backed by a synchronous closure.
pub struct FnConverter<F>(F);

/// Wrap a closure as a [`Converter`].
///
/// ```ignore
/// let converter = from_fn(|md| Ok(Conversion::new(format!("<pre>{md}</pre>"), md)));
/// ```
pub fn from_fn<F>(f: F) -> FnConverter<F>
where
    F: Fn(&str) -> Result<Conversion, ConvertError>,
{
    FnConverter(f)
}

impl<F> Converter for FnConverter<F>
where
    F: Fn(&str) -> Result<Conversion, ConvertError>,
{
    fn convert(&self, markdown: &str) -> impl Future<Output = Result<Conversion, ConvertError>> {
        future::ready((self.0)(markdown))
    }
}

#[cfg(feature = "pulldown")]
pub use self::markdown::MarkdownConverter;

#[cfg(feature = "pulldown")]
mod markdown {
    use super::*;
    use pulldown_cmark::{Options, Parser, html};

    /// `pulldown-cmark` backed converter.
    #[derive(Debug, Clone, Copy)]
    pub struct MarkdownConverter {
        options: Options,
    }

    impl Default for MarkdownConverter {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MarkdownConverter {
        /// Converter with tables, strikethrough, task lists and footnotes.
        pub fn new() -> Self {
            Self::with_options(
                Options::ENABLE_TABLES
                    | Options::ENABLE_STRIKETHROUGH
                    | Options::ENABLE_TASKLISTS
                    | Options::ENABLE_FOOTNOTES,
            )
        }

        /// Converter with explicit parser options.
        pub fn with_options(options: Options) -> Self {
            Self { options }
        }

        /// Render synchronously. Each call builds a fresh parser.
        pub fn render(&self, markdown: &str) -> Conversion {
            let parser = Parser::new_ext(markdown, self.options);
            let mut out = String::with_capacity(markdown.len() * 3 / 2);
            html::push_html(&mut out, parser);
            Conversion::new(out, markdown)
        }
    }

    impl Converter for MarkdownConverter {
        fn convert(
            &self,
            markdown: &str,
        ) -> impl Future<Output = Result<Conversion, ConvertError>> {
            future::ready(Ok(self.render(markdown)))
        }
    }
}

/// Renders fenced blocks of one language with a dedicated function.
///
/// A block qualifies only once it is exactly one closed fence whose info
/// string starts with `language`; until then (and for every other block) the
/// inner converter is used, so a diagram still streams in as plain code.
///
/// ```ignore
/// let converter = DialectConverter::new(MarkdownConverter::new(), "mermaid", |body| {
///     Ok(format!("<div class=\"mermaid\">{body}</div>"))
/// });
/// ```
pub struct DialectConverter<C, F> {
    inner: C,
    language: Cow<'static, str>,
    render: F,
}

impl<C, F> DialectConverter<C, F>
where
    C: Converter,
    F: Fn(&str) -> Result<String, ConvertError>,
{
    /// Wrap `inner`, routing `language` fences to `render`.
    pub fn new(inner: C, language: impl Into<Cow<'static, str>>, render: F) -> Self {
        Self {
            inner,
            language: language.into(),
            render,
        }
    }

    /// The wrapped converter.
    pub fn inner(&self) -> &C {
        &self.inner
    }

    fn dialect_body<'a>(&self, markdown: &'a str) -> Option<&'a str> {
        let trimmed = markdown.trim();
        if scan::fence_count(trimmed) != 2 {
            return None;
        }

        let (info, rest) = trimmed.strip_prefix("```")?.split_once('\n')?;
        if info.split_whitespace().next() != Some(self.language.as_ref()) {
            return None;
        }

        let body = rest.strip_suffix("```")?;
        Some(body.strip_suffix('\n').unwrap_or(body))
    }
}

impl<C, F> Converter for DialectConverter<C, F>
where
    C: Converter,
    F: Fn(&str) -> Result<String, ConvertError>,
{
    async fn convert(&self, markdown: &str) -> Result<Conversion, ConvertError> {
        match self.dialect_body(markdown) {
            Some(body) => {
                let html = (self.render)(body)?;
                Ok(Conversion::new(html, markdown))
            }
            None => self.inner.convert(markdown).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo() -> FnConverter<impl Fn(&str) -> Result<Conversion, ConvertError>> {
        from_fn(|md| Ok(Conversion::new(format!("<pre>{md}</pre>"), md)))
    }

    #[tokio::test]
    async fn test_fn_converter() {
        let conversion = echo().convert("```\nx").await.unwrap();
        assert_eq!(conversion.html, "<pre>```\nx</pre>");
        assert!(!conversion.is_complete);
    }

    #[tokio::test]
    async fn test_rc_converter_delegates() {
        let shared = Rc::new(echo());
        let conversion = shared.convert("a").await.unwrap();
        assert_eq!(conversion.html, "<pre>a</pre>");
    }

    #[tokio::test]
    async fn test_dialect_routes_closed_fence() {
        let converter = DialectConverter::new(echo(), "mermaid", |body| {
            Ok(format!("<div class=\"mermaid\">{body}</div>"))
        });

        let closed = converter
            .convert("```mermaid\ngraph TD\nA-->B\n```\n\n")
            .await
            .unwrap();
        assert_eq!(closed.html, "<div class=\"mermaid\">graph TD\nA-->B</div>");
        assert!(closed.is_complete);

        let open = converter.convert("```mermaid\ngraph TD").await.unwrap();
        assert_eq!(open.html, "<pre>```mermaid\ngraph TD</pre>");
        assert!(!open.is_complete);

        let other = converter.convert("```rust\nfn a() {}\n```").await.unwrap();
        assert_eq!(other.html, "<pre>```rust\nfn a() {}\n```</pre>");
    }

    #[tokio::test]
    async fn test_dialect_propagates_render_error() {
        let converter = DialectConverter::new(echo(), "dot", |_| {
            Err(ConvertError::Unsupported {
                language: "dot".into(),
            })
        });

        let err = converter.convert("```dot\ndigraph {}\n```").await.unwrap_err();
        assert_eq!(
            err,
            ConvertError::Unsupported {
                language: "dot".into()
            }
        );
    }

    #[cfg(feature = "pulldown")]
    mod markdown {
        use super::*;

        #[tokio::test]
        async fn test_markdown_heading_and_emphasis() {
            let converter = MarkdownConverter::new();

            let heading = converter.convert("# Title").await.unwrap();
            assert_eq!(heading.html, "<h1>Title</h1>\n");
            assert!(heading.is_complete);

            let bold = converter.render("some **bold** text");
            assert_eq!(bold.html, "<p>some <strong>bold</strong> text</p>\n");
        }

        #[tokio::test]
        async fn test_markdown_code_block_completeness() {
            let converter = MarkdownConverter::new();

            let open = converter.convert("```rust\nfn main() {}").await.unwrap();
            assert!(!open.is_complete);
            assert!(open.html.contains("<code class=\"language-rust\">"));

            let closed = converter.convert("```rust\nfn main() {}\n```").await.unwrap();
            assert!(closed.is_complete);
            assert_eq!(
                closed.html,
                "<pre><code class=\"language-rust\">fn main() {}\n</code></pre>\n"
            );
        }

        #[test]
        fn test_markdown_growing_prefixes_are_independent() {
            let converter = MarkdownConverter::new();
            let text = "- one\n- two\n- three";
            let rendered: Vec<_> = (1..=text.len())
                .filter(|end| text.is_char_boundary(*end))
                .map(|end| converter.render(&text[..end]))
                .collect();

            let full = converter.render(text);
            assert_eq!(rendered.last(), Some(&full));
            assert_eq!(converter.render(text), full);
        }
    }
}
