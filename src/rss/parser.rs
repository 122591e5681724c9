//! Tolerant parser for RSS 2.0, RSS 1.0 (RDF) and Atom documents.
//!
//! The parser walks the document with a streaming XML reader. A syntax error
//! costs only the entry it occurs in. A document only fails when it is broken
//! (or not a feed at all) and nothing usable came out of it.

use std::borrow::Cow;

use encoding_rs::{Encoding, UTF_8};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, warn};
use url::Url;

use crate::datetime::parse_feed_date;
use crate::error::{FeedkeeperError, Result};
use crate::rss::types::{resolve_guid, ParsedEntry, ParsedFeed};

/// Favicon service used when a feed names no icon of its own.
const FAVICON_SERVICE: &str = "https://www.google.com/s2/favicons";

/// Outcome of handling one event; an error means the document is not a feed.
type Step = std::result::Result<(), String>;

/// Feed flavour, decided by the root element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    Rss,
    Rdf,
    Atom,
}

impl Dialect {
    fn from_root(local_name: &str) -> Option<Self> {
        match local_name {
            "rss" => Some(Dialect::Rss),
            "RDF" => Some(Dialect::Rdf),
            "feed" => Some(Dialect::Atom),
            _ => None,
        }
    }

    fn entry_element(&self) -> &'static str {
        match self {
            Dialect::Rss | Dialect::Rdf => "item",
            Dialect::Atom => "entry",
        }
    }

    fn feed_element(&self) -> &'static str {
        match self {
            Dialect::Rss | Dialect::Rdf => "channel",
            Dialect::Atom => "feed",
        }
    }
}

/// Field a text capture is collecting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    FeedTitle,
    FeedDescription,
    FeedLink,
    FeedLanguage,
    FeedIcon,
    FeedLogo,
    EntryTitle,
    EntryId,
    EntryLink,
    EntryAuthor,
    EntryContent,
    EntrySummary,
    EntryPublished,
    EntryUpdated,
}

/// Text being collected for a field.
///
/// Child elements inside the field (inline XHTML, unescaped HTML) switch the
/// capture to raw mode: the value becomes the source slice between the tags.
#[derive(Debug)]
struct Capture {
    field: Field,
    depth: usize,
    start: usize,
    text: String,
    markup: bool,
}

#[derive(Debug, Default)]
struct FeedFields {
    title: Option<String>,
    description: Option<String>,
    link: Option<String>,
    language: Option<String>,
    icon: Option<String>,
    logo: Option<String>,
}

#[derive(Debug, Default)]
struct EntryFields {
    id: Option<String>,
    link: Option<String>,
    title: Option<String>,
    author: Option<String>,
    content: Option<String>,
    summary: Option<String>,
    published: Option<String>,
    updated: Option<String>,
}

#[derive(Debug, Default)]
struct ParseState {
    dialect: Option<Dialect>,
    stack: Vec<String>,
    feed: FeedFields,
    entry: Option<EntryFields>,
    entries: Vec<EntryFields>,
    capture: Option<Capture>,
}

/// Parse a feed document.
///
/// `source_url` is the URL the document was fetched from; relative links are
/// resolved against it.
pub fn parse_feed(content: &[u8], source_url: &str) -> Result<ParsedFeed> {
    let text = decode(content);
    let mut reader = Reader::from_str(&text);
    // Mismatched end tags close whatever is open instead of ending the walk.
    reader.check_end_names(false);
    let mut state = ParseState::default();
    let mut failure: Option<String> = None;

    loop {
        let before = reader.buffer_position();
        let event = reader.read_event();
        let after = reader.buffer_position();

        let step = match event {
            Ok(Event::Start(e)) => state.open(&reader, &e, after),
            Ok(Event::Empty(e)) => state.empty(&reader, &e),
            Ok(Event::End(_)) => {
                state.close(&text, before);
                Ok(())
            }
            Ok(Event::Text(t)) => {
                state.text(&String::from_utf8_lossy(&t));
                Ok(())
            }
            Ok(Event::CData(c)) => {
                state.cdata(&String::from_utf8_lossy(&c));
                Ok(())
            }
            Ok(Event::Eof) => break,
            Ok(_) => Ok(()),
            Err(e) => {
                let message = format!("malformed XML at byte {}: {}", after, e);
                debug!("Skipping broken entry in {}: {}", source_url, message);
                state.abandon_entry();
                failure.get_or_insert(message);
                if after <= before {
                    // no progress, nothing more can be read
                    break;
                }
                continue;
            }
        };

        if let Err(message) = step {
            failure = Some(message);
            break;
        }
    }

    let recognized = state.dialect.is_some();
    let feed = state.finish(source_url);

    match failure {
        Some(message) if feed.entries.is_empty() => Err(FeedkeeperError::Parse(message)),
        Some(message) => {
            warn!(
                "Recovered {} entries from {} despite error: {}",
                feed.entries.len(),
                source_url,
                message
            );
            Ok(feed)
        }
        None if !recognized => Err(FeedkeeperError::Parse(
            "document has no RSS, RDF or Atom root element".to_string(),
        )),
        None => Ok(feed),
    }
}

impl ParseState {
    fn open(&mut self, reader: &Reader<&[u8]>, e: &BytesStart, after: usize) -> Step {
        if let Some(capture) = self.capture.as_mut() {
            capture.depth += 1;
            capture.markup = true;
            return Ok(());
        }

        let Some(dialect) = self.dialect else {
            let local = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
            let dialect = Dialect::from_root(&local)
                .ok_or_else(|| format!("not a feed document (root element <{local}>)"))?;
            if dialect == Dialect::Atom {
                self.feed.language = attribute(reader, e, b"xml:lang");
            }
            self.dialect = Some(dialect);
            self.stack.push(local);
            return Ok(());
        };

        let name = element_name(dialect, e);
        if name == dialect.entry_element() && self.entry.is_none() {
            self.entry = Some(EntryFields::default());
        } else if dialect == Dialect::Atom && name == "link" {
            self.atom_link(reader, e);
        } else if let Some(field) = self.field_for(dialect, &name) {
            self.capture = Some(Capture {
                field,
                depth: 0,
                start: after,
                text: String::new(),
                markup: false,
            });
        }

        self.stack.push(name);
        Ok(())
    }

    fn empty(&mut self, reader: &Reader<&[u8]>, e: &BytesStart) -> Step {
        if let Some(capture) = self.capture.as_mut() {
            capture.markup = true;
            return Ok(());
        }
        match self.dialect {
            Some(Dialect::Atom) if element_name(Dialect::Atom, e) == "link" => {
                self.atom_link(reader, e);
                Ok(())
            }
            Some(_) => Ok(()),
            None => {
                let local = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                Err(format!("not a feed document (root element <{local}/>)"))
            }
        }
    }

    /// Drop the entry being read; the rest of the document still counts.
    fn abandon_entry(&mut self) {
        self.capture = None;
        self.entry = None;
    }

    fn close(&mut self, source: &str, before: usize) {
        if let Some(mut capture) = self.capture.take() {
            if capture.depth > 0 {
                capture.depth -= 1;
                self.capture = Some(capture);
                return;
            }
            let value = if capture.markup {
                let raw = source.get(capture.start..before).unwrap_or_default();
                // The reader may already have consumed the '<' of the end tag.
                raw.strip_suffix('<').unwrap_or(raw).trim().to_string()
            } else {
                capture.text.trim().to_string()
            };
            self.assign(capture.field, value);
        }

        let Some(name) = self.stack.pop() else {
            return;
        };
        if let Some(dialect) = self.dialect {
            if name == dialect.entry_element() {
                if let Some(entry) = self.entry.take() {
                    self.entries.push(entry);
                }
            }
        }
    }

    fn text(&mut self, raw: &str) {
        if let Some(capture) = self.capture.as_mut() {
            let text = quick_xml::escape::unescape_with(raw, resolve_html_entity)
                .unwrap_or(Cow::Borrowed(raw));
            capture.text.push_str(&text);
        }
    }

    fn cdata(&mut self, raw: &str) {
        if let Some(capture) = self.capture.as_mut() {
            capture.text.push_str(raw);
        }
    }

    fn parent(&self) -> &str {
        self.stack.last().map(String::as_str).unwrap_or_default()
    }

    fn field_for(&self, dialect: Dialect, name: &str) -> Option<Field> {
        let parent = self.parent();

        if self.entry.is_some() {
            if dialect == Dialect::Atom && parent == "author" && name == "name" {
                return Some(Field::EntryAuthor);
            }
            if parent != dialect.entry_element() {
                return None;
            }
            return match (dialect, name) {
                (_, "title") => Some(Field::EntryTitle),
                (Dialect::Atom, "id") => Some(Field::EntryId),
                (Dialect::Atom, "summary") => Some(Field::EntrySummary),
                (Dialect::Atom, "content") => Some(Field::EntryContent),
                (Dialect::Atom, "published" | "issued") => Some(Field::EntryPublished),
                (Dialect::Atom, "updated" | "modified") => Some(Field::EntryUpdated),
                (Dialect::Rss | Dialect::Rdf, "guid") => Some(Field::EntryId),
                (Dialect::Rss | Dialect::Rdf, "link") => Some(Field::EntryLink),
                (Dialect::Rss | Dialect::Rdf, "description") => Some(Field::EntrySummary),
                (Dialect::Rss | Dialect::Rdf, "content:encoded") => Some(Field::EntryContent),
                (Dialect::Rss | Dialect::Rdf, "pubDate" | "dc:date") => Some(Field::EntryPublished),
                (Dialect::Rss | Dialect::Rdf, "author" | "dc:creator") => Some(Field::EntryAuthor),
                _ => None,
            };
        }

        if parent == "image" && name == "url" && dialect != Dialect::Atom {
            return Some(Field::FeedLogo);
        }
        if parent != dialect.feed_element() {
            return None;
        }
        match (dialect, name) {
            (_, "title") => Some(Field::FeedTitle),
            (Dialect::Atom, "subtitle" | "tagline") => Some(Field::FeedDescription),
            (Dialect::Atom, "icon") => Some(Field::FeedIcon),
            (Dialect::Atom, "logo") => Some(Field::FeedLogo),
            (Dialect::Rss | Dialect::Rdf, "description") => Some(Field::FeedDescription),
            (Dialect::Rss | Dialect::Rdf, "link") => Some(Field::FeedLink),
            (Dialect::Rss | Dialect::Rdf, "language" | "dc:language") => Some(Field::FeedLanguage),
            _ => None,
        }
    }

    /// Atom links carry their target in attributes. Only alternate links
    /// (the default relation) point at the human-readable page.
    fn atom_link(&mut self, reader: &Reader<&[u8]>, e: &BytesStart) {
        let rel = attribute(reader, e, b"rel").unwrap_or_else(|| "alternate".to_string());
        if rel != "alternate" {
            return;
        }
        let Some(href) = attribute(reader, e, b"href") else {
            return;
        };

        let parent = self.parent().to_string();
        match self.entry.as_mut() {
            Some(entry) if parent == "entry" => set_once(&mut entry.link, href),
            None if parent == "feed" => set_once(&mut self.feed.link, href),
            _ => {}
        }
    }

    fn assign(&mut self, field: Field, value: String) {
        if value.is_empty() {
            return;
        }
        let feed = &mut self.feed;
        match (field, self.entry.as_mut()) {
            (Field::FeedTitle, _) => set_once(&mut feed.title, value),
            (Field::FeedDescription, _) => set_once(&mut feed.description, value),
            (Field::FeedLink, _) => set_once(&mut feed.link, value),
            (Field::FeedLanguage, _) => set_once(&mut feed.language, value),
            (Field::FeedIcon, _) => set_once(&mut feed.icon, value),
            (Field::FeedLogo, _) => set_once(&mut feed.logo, value),
            (Field::EntryTitle, Some(entry)) => set_once(&mut entry.title, value),
            (Field::EntryId, Some(entry)) => set_once(&mut entry.id, value),
            (Field::EntryLink, Some(entry)) => set_once(&mut entry.link, value),
            (Field::EntryAuthor, Some(entry)) => set_once(&mut entry.author, value),
            (Field::EntryContent, Some(entry)) => set_once(&mut entry.content, value),
            (Field::EntrySummary, Some(entry)) => set_once(&mut entry.summary, value),
            (Field::EntryPublished, Some(entry)) => set_once(&mut entry.published, value),
            (Field::EntryUpdated, Some(entry)) => set_once(&mut entry.updated, value),
            (_, None) => {}
        }
    }

    fn finish(self, source_url: &str) -> ParsedFeed {
        let base = Url::parse(source_url).ok();
        let site_url = self
            .feed
            .link
            .map(|link| resolve_link(base.as_ref(), &link));
        let icon_url = self
            .feed
            .icon
            .or(self.feed.logo)
            .map(|icon| resolve_link(base.as_ref(), &icon))
            .or_else(|| derive_favicon(site_url.as_deref()));

        let entry_base = site_url
            .as_deref()
            .and_then(|site| Url::parse(site).ok())
            .or(base);
        let entries = self
            .entries
            .into_iter()
            .map(|fields| build_entry(fields, entry_base.as_ref()))
            .collect::<Vec<_>>();

        debug!("Parsed {} entries from {}", entries.len(), source_url);

        ParsedFeed {
            title: self.feed.title,
            description: self.feed.description,
            site_url,
            language: self.feed.language,
            icon_url,
            entries,
        }
    }
}

fn build_entry(fields: EntryFields, base: Option<&Url>) -> ParsedEntry {
    let url = fields.link.map(|link| resolve_link(base, &link));
    let guid = resolve_guid(fields.id.as_deref(), url.as_deref());
    let published_at = fields
        .published
        .as_deref()
        .and_then(parse_feed_date)
        .or_else(|| fields.updated.as_deref().and_then(parse_feed_date));

    ParsedEntry {
        guid,
        url,
        title: fields.title,
        author: fields.author,
        content: fields.content.or_else(|| fields.summary.clone()),
        summary: fields.summary,
        published_at,
    }
}

fn set_once(slot: &mut Option<String>, value: String) {
    if slot.is_none() {
        *slot = Some(value);
    }
}

/// Element name as matched by the field table.
///
/// RSS documents mix namespaces through prefixes (`content:encoded`,
/// `dc:creator`), so the qualified name is kept. Atom documents are matched on
/// local names so a prefixed `atom:` document reads the same.
fn element_name(dialect: Dialect, e: &BytesStart) -> String {
    match dialect {
        Dialect::Atom => String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
        Dialect::Rss | Dialect::Rdf => String::from_utf8_lossy(e.name().as_ref()).into_owned(),
    }
}

fn attribute(reader: &Reader<&[u8]>, e: &BytesStart, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == key)
        .and_then(|attr| attr.decode_and_unescape_value(reader).ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Resolve a possibly relative link. Absolute links are returned unchanged.
fn resolve_link(base: Option<&Url>, link: &str) -> String {
    match Url::parse(link) {
        Ok(_) => link.to_string(),
        Err(url::ParseError::RelativeUrlWithoutBase) => base
            .and_then(|base| base.join(link).ok())
            .map(String::from)
            .unwrap_or_else(|| link.to_string()),
        Err(_) => link.to_string(),
    }
}

/// Build a favicon URL for the host of `site_url`.
///
/// Returns `None` when the site URL is missing, relative, or has no host.
/// A non-default port stays part of the domain.
pub fn derive_favicon(site_url: Option<&str>) -> Option<String> {
    let url = Url::parse(site_url?.trim()).ok()?;
    let host = url.host_str().filter(|host| !host.is_empty())?;
    let domain = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    Some(format!("{FAVICON_SERVICE}?domain={domain}&sz=64"))
}

/// Named HTML entities that feeds put in XML without declaring them.
fn resolve_html_entity(entity: &str) -> Option<&'static str> {
    Some(match entity {
        "nbsp" => "\u{a0}",
        "copy" => "\u{a9}",
        "reg" => "\u{ae}",
        "trade" => "\u{2122}",
        "hellip" => "\u{2026}",
        "mdash" => "\u{2014}",
        "ndash" => "\u{2013}",
        "lsquo" => "\u{2018}",
        "rsquo" => "\u{2019}",
        "ldquo" => "\u{201c}",
        "rdquo" => "\u{201d}",
        "laquo" => "\u{ab}",
        "raquo" => "\u{bb}",
        "middot" => "\u{b7}",
        "bull" => "\u{2022}",
        "euro" => "\u{20ac}",
        _ => return None,
    })
}

/// Decode the raw document to UTF-8.
///
/// A byte order mark wins, then the XML declaration, then UTF-8.
fn decode(content: &[u8]) -> Cow<'_, str> {
    let encoding = Encoding::for_bom(content)
        .map(|(encoding, _)| encoding)
        .or_else(|| declared_encoding(content))
        .unwrap_or(UTF_8);
    let (text, used, had_errors) = encoding.decode(content);
    if had_errors {
        debug!("Replaced malformed {} sequences in feed body", used.name());
    }
    text
}

fn declared_encoding(content: &[u8]) -> Option<&'static Encoding> {
    let head = String::from_utf8_lossy(&content[..content.len().min(512)]);
    let head = head.trim_start();
    if !head.starts_with("<?xml") {
        return None;
    }
    let declaration = &head[..head.find("?>")?];
    let rest = &declaration[declaration.find("encoding")? + "encoding".len()..];
    let rest = rest.trim_start().strip_prefix('=')?.trim_start();
    let quote = rest.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let value = &rest[1..];
    let label = &value[..value.find(quote)?];
    Encoding::for_label(label.trim().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    const SOURCE: &str = "https://example.com/feed.xml";

    #[test]
    fn test_parse_rss() {
        let rss = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/"
     xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel>
    <title>Test Feed</title>
    <link>https://example.com</link>
    <description>A test feed</description>
    <language>en-us</language>
    <item>
      <title>First Article</title>
      <link>https://example.com/1</link>
      <guid isPermaLink="false">guid-1</guid>
      <description>&lt;p&gt;Short&lt;/p&gt;</description>
      <content:encoded><![CDATA[<p>Full <b>body</b></p>]]></content:encoded>
      <dc:creator>Jane Doe</dc:creator>
      <pubDate>Tue, 10 Jun 2003 04:00:00 GMT</pubDate>
    </item>
  </channel>
</rss>"#;

        let feed = parse_feed(rss.as_bytes(), SOURCE).unwrap();
        assert_eq!(feed.title.as_deref(), Some("Test Feed"));
        assert_eq!(feed.description.as_deref(), Some("A test feed"));
        assert_eq!(feed.site_url.as_deref(), Some("https://example.com"));
        assert_eq!(feed.language.as_deref(), Some("en-us"));
        assert_eq!(
            feed.icon_url.as_deref(),
            Some("https://www.google.com/s2/favicons?domain=example.com&sz=64")
        );

        assert_eq!(feed.entries.len(), 1);
        let entry = &feed.entries[0];
        assert_eq!(entry.guid, "guid-1");
        assert_eq!(entry.title.as_deref(), Some("First Article"));
        assert_eq!(entry.url.as_deref(), Some("https://example.com/1"));
        assert_eq!(entry.summary.as_deref(), Some("<p>Short</p>"));
        assert_eq!(entry.content.as_deref(), Some("<p>Full <b>body</b></p>"));
        assert_eq!(entry.author.as_deref(), Some("Jane Doe"));
        assert_eq!(
            entry.published_at,
            Some(Utc.with_ymd_and_hms(2003, 6, 10, 4, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_parse_atom() {
        let atom = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xml:lang="de">
  <title>Atom Feed</title>
  <subtitle>Sub</subtitle>
  <link rel="self" href="https://example.org/atom.xml"/>
  <link href="https://example.org/"/>
  <icon>https://example.org/icon.png</icon>
  <entry>
    <id>urn:uuid:1</id>
    <title>Atom Entry</title>
    <link rel="edit" href="https://example.org/edit/1"/>
    <link rel="alternate" href="https://example.org/entry"/>
    <summary>Entry summary</summary>
    <author><name>Author Name</name><email>a@example.org</email></author>
    <updated>2025-01-01T00:00:00Z</updated>
  </entry>
</feed>"#;

        let feed = parse_feed(atom.as_bytes(), SOURCE).unwrap();
        assert_eq!(feed.title.as_deref(), Some("Atom Feed"));
        assert_eq!(feed.description.as_deref(), Some("Sub"));
        assert_eq!(feed.site_url.as_deref(), Some("https://example.org/"));
        assert_eq!(feed.language.as_deref(), Some("de"));
        assert_eq!(feed.icon_url.as_deref(), Some("https://example.org/icon.png"));

        let entry = &feed.entries[0];
        assert_eq!(entry.guid, "urn:uuid:1");
        assert_eq!(entry.url.as_deref(), Some("https://example.org/entry"));
        assert_eq!(entry.author.as_deref(), Some("Author Name"));
        // no content element, so content falls back to the summary
        assert_eq!(entry.content.as_deref(), Some("Entry summary"));
        assert_eq!(entry.summary.as_deref(), Some("Entry summary"));
        // no published element, so the updated date is used
        assert_eq!(
            entry.published_at,
            Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_parse_atom_xhtml_content() {
        let atom = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <id>x-1</id>
    <content type="xhtml"><div xmlns="http://www.w3.org/1999/xhtml"><p>Hello <b>world</b></p><br/></div></content>
  </entry>
</feed>"#;

        let feed = parse_feed(atom.as_bytes(), SOURCE).unwrap();
        let content = feed.entries[0].content.as_deref().unwrap();
        assert!(content.starts_with("<div"));
        assert!(content.contains("<p>Hello <b>world</b></p>"));
        assert!(content.ends_with("</div>"));
    }

    #[test]
    fn test_parse_rdf() {
        let rdf = r#"<?xml version="1.0"?>
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"
         xmlns="http://purl.org/rss/1.0/"
         xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel rdf:about="https://example.net/">
    <title>RDF Feed</title>
    <link>https://example.net/</link>
    <dc:language>ja</dc:language>
  </channel>
  <item rdf:about="https://example.net/a">
    <title>A</title>
    <link>https://example.net/a</link>
    <dc:date>2024-05-01T09:00:00+09:00</dc:date>
  </item>
  <item rdf:about="https://example.net/b">
    <title>B</title>
    <link>https://example.net/b</link>
  </item>
</rdf:RDF>"#;

        let feed = parse_feed(rdf.as_bytes(), SOURCE).unwrap();
        assert_eq!(feed.title.as_deref(), Some("RDF Feed"));
        assert_eq!(feed.language.as_deref(), Some("ja"));
        assert_eq!(feed.entries.len(), 2);
        assert_eq!(feed.entries[0].guid, "https://example.net/a");
        assert_eq!(
            feed.entries[0].published_at,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(feed.entries[1].title.as_deref(), Some("B"));
        assert_eq!(feed.entries[1].published_at, None);
    }

    #[test]
    fn test_guid_falls_back_to_link_then_empty() {
        let rss = r#"<rss version="2.0"><channel>
  <item><title>Linked</title><link>https://example.com/post</link></item>
  <item><title>Bare</title></item>
</channel></rss>"#;

        let feed = parse_feed(rss.as_bytes(), SOURCE).unwrap();
        assert_eq!(feed.entries[0].guid, "https://example.com/post");
        assert_eq!(feed.entries[1].guid, "");
        assert_eq!(feed.entries[1].url, None);
    }

    #[test]
    fn test_entries_keep_document_order() {
        let rss = r#"<rss version="2.0"><channel>
  <item><guid>3</guid></item>
  <item><guid>1</guid></item>
  <item><guid>2</guid></item>
</channel></rss>"#;

        let feed = parse_feed(rss.as_bytes(), SOURCE).unwrap();
        let guids: Vec<&str> = feed.entries.iter().map(|e| e.guid.as_str()).collect();
        assert_eq!(guids, vec!["3", "1", "2"]);
    }

    #[test]
    fn test_unparseable_date_is_none() {
        let rss = r#"<rss version="2.0"><channel>
  <item><guid>1</guid><pubDate>sometime last week</pubDate></item>
</channel></rss>"#;

        let feed = parse_feed(rss.as_bytes(), SOURCE).unwrap();
        assert_eq!(feed.entries[0].published_at, None);
    }

    #[test]
    fn test_empty_feed_is_valid() {
        let rss = r#"<rss version="2.0"><channel><title>Quiet</title></channel></rss>"#;
        let feed = parse_feed(rss.as_bytes(), SOURCE).unwrap();
        assert_eq!(feed.title.as_deref(), Some("Quiet"));
        assert!(feed.entries.is_empty());
        assert_eq!(feed.site_url, None);
        assert_eq!(feed.icon_url, None);
    }

    #[test]
    fn test_truncated_document_keeps_completed_entries() {
        let rss = r#"<rss version="2.0"><channel>
  <title>Broken</title>
  <item><guid>1</guid><title>One</title></item>
  <item><guid>2</guid><title>Two</title></item>
  <item><guid>3</guid><tit"#;

        let feed = parse_feed(rss.as_bytes(), SOURCE).unwrap();
        let guids: Vec<&str> = feed.entries.iter().map(|e| e.guid.as_str()).collect();
        assert_eq!(guids, vec!["1", "2"]);
    }

    #[test]
    fn test_mismatched_end_tag_keeps_later_entries() {
        let rss = r#"<rss version="2.0"><channel>
  <title>Sloppy</title>
  <item><guid>1</guid><title>One</title></item>
  <item><guid>2</guid><title>bad</wrong></item>
  <item><guid>3</guid><title>Three</title></item>
</channel></rss>"#;

        let feed = parse_feed(rss.as_bytes(), SOURCE).unwrap();
        let guids: Vec<&str> = feed.entries.iter().map(|e| e.guid.as_str()).collect();
        assert_eq!(guids, vec!["1", "2", "3"]);
        assert_eq!(feed.entries[1].title.as_deref(), Some("bad"));
        assert_eq!(feed.entries[2].title.as_deref(), Some("Three"));
        assert_eq!(feed.title.as_deref(), Some("Sloppy"));
    }

    #[test]
    fn test_broken_document_without_entries_fails() {
        let rss = r#"<rss version="2.0"><channel><title>Broken</title><item attr="oops"#;
        let err = parse_feed(rss.as_bytes(), SOURCE).unwrap_err();
        assert!(matches!(err, FeedkeeperError::Parse(_)));
    }

    #[test]
    fn test_not_xml_fails() {
        let err = parse_feed(b"This is not XML", SOURCE).unwrap_err();
        assert!(matches!(err, FeedkeeperError::Parse(_)));
    }

    #[test]
    fn test_html_page_fails() {
        let html = br#"<!DOCTYPE html><html><head><title>Blog</title></head><body></body></html>"#;
        let err = parse_feed(html, SOURCE).unwrap_err();
        assert!(err.to_string().contains("not a feed document"));
    }

    #[test]
    fn test_relative_links_resolved() {
        let rss = r#"<rss version="2.0"><channel>
  <link>https://blog.example.com/</link>
  <item><title>Rel</title><link>/posts/1</link></item>
</channel></rss>"#;

        let feed = parse_feed(rss.as_bytes(), SOURCE).unwrap();
        assert_eq!(
            feed.entries[0].url.as_deref(),
            Some("https://blog.example.com/posts/1")
        );
        assert_eq!(feed.entries[0].guid, "https://blog.example.com/posts/1");
    }

    #[test]
    fn test_html_entities_in_text() {
        let rss = r#"<rss version="2.0"><channel>
  <title>Tom&amp;Jerry&nbsp;&mdash; news</title>
</channel></rss>"#;

        let feed = parse_feed(rss.as_bytes(), SOURCE).unwrap();
        assert_eq!(feed.title.as_deref(), Some("Tom&Jerry\u{a0}\u{2014} news"));
    }

    #[test]
    fn test_rss_image_used_as_icon() {
        let rss = r#"<rss version="2.0"><channel>
  <link>https://example.com</link>
  <image><url>https://example.com/logo.png</url><title>Logo</title></image>
</channel></rss>"#;

        let feed = parse_feed(rss.as_bytes(), SOURCE).unwrap();
        assert_eq!(feed.icon_url.as_deref(), Some("https://example.com/logo.png"));
        assert_eq!(feed.title, None);
    }

    #[test]
    fn test_declared_latin1_encoding() {
        let mut doc = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><rss version=\"2.0\"><channel><title>Caf".to_vec();
        doc.push(0xE9);
        doc.extend_from_slice(b"</title></channel></rss>");

        let feed = parse_feed(&doc, SOURCE).unwrap();
        assert_eq!(feed.title.as_deref(), Some("Café"));
    }

    #[test]
    fn test_utf8_bom() {
        let mut doc = vec![0xEF, 0xBB, 0xBF];
        doc.extend_from_slice("<rss><channel><title>Ünïcode</title></channel></rss>".as_bytes());
        let feed = parse_feed(&doc, SOURCE).unwrap();
        assert_eq!(feed.title.as_deref(), Some("Ünïcode"));
    }

    #[test]
    fn test_derive_favicon() {
        assert_eq!(
            derive_favicon(Some("https://blog.example.com")).as_deref(),
            Some("https://www.google.com/s2/favicons?domain=blog.example.com&sz=64")
        );
        assert_eq!(
            derive_favicon(Some("https://example.com/path/page")).as_deref(),
            Some("https://www.google.com/s2/favicons?domain=example.com&sz=64")
        );
        assert_eq!(
            derive_favicon(Some("https://example.com:8080/")).as_deref(),
            Some("https://www.google.com/s2/favicons?domain=example.com:8080&sz=64")
        );
        assert_eq!(derive_favicon(None), None);
        assert_eq!(derive_favicon(Some("")), None);
        assert_eq!(derive_favicon(Some("/relative/path")), None);
        assert_eq!(derive_favicon(Some("not a url")), None);
    }

    #[test]
    fn test_declared_encoding_parsing() {
        assert_eq!(
            declared_encoding(b"<?xml version='1.0' encoding='windows-1252'?><rss/>"),
            Some(encoding_rs::WINDOWS_1252)
        );
        assert_eq!(declared_encoding(b"<rss/>"), None);
        assert_eq!(declared_encoding(b"<?xml version=\"1.0\"?><rss/>"), None);
    }
}
