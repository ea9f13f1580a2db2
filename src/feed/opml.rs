use anyhow::{Context, Result};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::Cursor;
use thiserror::Error;

use crate::util::validate_url;

/// SEC-003: Maximum allowed nesting depth for OPML outline elements.
const MAX_OPML_DEPTH: usize = 50;

/// Errors that can occur during OPML parsing.
#[derive(Debug, Error)]
pub enum OpmlError {
    /// SEC-003: OPML nesting depth exceeds safety limit.
    #[error("OPML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    /// XML parsing failed.
    #[error("XML parse error: {0}")]
    XmlParse(String),

    /// The document has no `<opml>` root.
    #[error("Document is not OPML")]
    NotOpml,
}

/// A feed subscription from an OPML document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpmlFeed {
    /// `title`, else `text`, else the feed URL.
    pub title: String,
    pub xml_url: String,
}

/// Extract feed subscriptions from an OPML document.
///
/// Every `<outline>` carrying `xmlUrl` (or `url`) counts, at any depth.
/// Category outlines are traversed. Addresses failing [`validate_url`] are
/// skipped with a warning, and a URL listed twice is returned once.
///
/// XXE: quick-xml (0.37) never expands `<!ENTITY>` declarations, and values go
/// through `decode_and_unescape_value`, which only resolves the five XML
/// builtins.
pub fn parse_opml(content: &str) -> Result<Vec<OpmlFeed>, OpmlError> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut feeds: Vec<OpmlFeed> = Vec::new();
    let mut seen_root = false;
    let mut depth: usize = 0;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"opml" => seen_root = true,
            Ok(Event::Start(e)) if e.name().as_ref() == b"outline" => {
                depth += 1;
                if depth > MAX_OPML_DEPTH {
                    return Err(OpmlError::MaxDepthExceeded(MAX_OPML_DEPTH));
                }
                push_outline(&mut feeds, &e, &reader)?;
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"outline" => {
                push_outline(&mut feeds, &e, &reader)?;
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"outline" => {
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(OpmlError::XmlParse(e.to_string())),
            _ => {}
        }
    }

    if !seen_root {
        return Err(OpmlError::NotOpml);
    }
    Ok(feeds)
}

fn push_outline(
    feeds: &mut Vec<OpmlFeed>,
    e: &BytesStart<'_>,
    reader: &Reader<&[u8]>,
) -> Result<(), OpmlError> {
    let mut xml_url = None;
    let mut title = None;
    let mut text = None;

    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed OPML attribute");
                continue;
            }
        };
        let value = || {
            attr.decode_and_unescape_value(reader.decoder())
                .map(|v| v.trim().to_owned())
                .map_err(|e| OpmlError::XmlParse(e.to_string()))
        };
        match attr.key.as_ref() {
            b"xmlUrl" => xml_url = Some(value()?),
            b"url" if xml_url.is_none() => xml_url = Some(value()?),
            b"title" => title = Some(value()?),
            b"text" => text = Some(value()?),
            _ => {}
        }
    }

    let Some(url) = xml_url.filter(|u| !u.is_empty()) else {
        return Ok(());
    };
    if let Err(e) = validate_url(&url) {
        tracing::warn!(url = %url, error = %e, "Skipping invalid feed URL");
        return Ok(());
    }
    if feeds.iter().any(|f| f.xml_url == url) {
        return Ok(());
    }

    let title = title
        .or(text)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| url.clone());
    feeds.push(OpmlFeed {
        title,
        xml_url: url,
    });
    Ok(())
}

/// Render subscriptions as an OPML 2.0 document.
pub fn export_opml(feeds: &[OpmlFeed]) -> Result<String> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .context("Failed to write XML declaration")?;

    let mut opml = BytesStart::new("opml");
    opml.push_attribute(("version", "2.0"));
    writer
        .write_event(Event::Start(opml))
        .context("Failed to write opml element")?;

    for event in [
        Event::Start(BytesStart::new("head")),
        Event::Start(BytesStart::new("title")),
        Event::Text(BytesText::new("feedfold subscriptions")),
        Event::End(BytesEnd::new("title")),
        Event::End(BytesEnd::new("head")),
    ] {
        writer
            .write_event(event)
            .context("Failed to write head element")?;
    }

    writer
        .write_event(Event::Start(BytesStart::new("body")))
        .context("Failed to write body element")?;
    for feed in feeds {
        let mut outline = BytesStart::new("outline");
        outline.push_attribute(("type", "rss"));
        outline.push_attribute(("text", feed.title.as_str()));
        outline.push_attribute(("title", feed.title.as_str()));
        outline.push_attribute(("xmlUrl", feed.xml_url.as_str()));
        writer
            .write_event(Event::Empty(outline))
            .with_context(|| format!("Failed to write outline for {}", feed.xml_url))?;
    }
    writer
        .write_event(Event::End(BytesEnd::new("body")))
        .context("Failed to write body end")?;
    writer
        .write_event(Event::End(BytesEnd::new("opml")))
        .context("Failed to write opml end")?;

    let result = writer.into_inner().into_inner();
    String::from_utf8(result).context("Generated OPML contains invalid UTF-8")
}
