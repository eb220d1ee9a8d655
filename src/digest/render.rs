//! Digest rendering.
//!
//! A message is rendered twice from the same data, as Markdown and as
//! HTML, and assembled into a MIME document: `multipart/related` holding a
//! `multipart/alternative` body followed by one inline part per item.

use std::fmt::Write as _;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use html_escape::{encode_double_quoted_attribute, encode_text};
use uuid::Uuid;

use super::batcher::{DigestEntry, Message};
use crate::config::DigestSettings;
use crate::domain::ContentItem;

const BASE64_LINE: usize = 76;

/// A digest message ready for dispatch
#[derive(Debug, Clone)]
pub struct RenderedMessage {
    pub index: usize,
    pub count: usize,
    pub subject: String,
    pub from: String,
    pub to: Vec<String>,
    pub markdown: String,
    pub html: String,
    /// Complete MIME document (RFC 5322 headers + body)
    pub document: String,
}

/// Subject line: `<subject> <YYYY-MM-DD> [i/n]`
pub fn subject_line(subject: &str, date: DateTime<Utc>, index: usize, count: usize) -> String {
    format!("{} {} [{}/{}]", subject, date.format("%Y-%m-%d"), index, count)
}

/// Content-ID of an item inside a message
fn content_id(message: usize, bundle: usize, entry: &DigestEntry<ContentItem>) -> String {
    format!("m{}.b{}.i{}@gleaner", message, bundle, entry.seq)
}

fn attachment_name(entry: &DigestEntry<ContentItem>) -> String {
    let item = &entry.item;
    format!("{}-{}.{}", item.source_id, item.item_id(), item.extension)
}

/// Markdown body
pub fn render_markdown(message: &Message<ContentItem>) -> String {
    let mut out = String::new();

    for (b, bundle) in message.bundles.iter().enumerate() {
        let label = bundle.sequence_label();
        if label.is_empty() {
            let _ = writeln!(out, "# {}\n", bundle.title);
        } else {
            let _ = writeln!(out, "# {} {}\n", bundle.title, label);
        }

        for entry in &bundle.entries {
            let item = &entry.item;
            let title = item.title();
            let _ = writeln!(
                out,
                "## ({}/{}) {} #{} [{}]({})",
                entry.seq,
                entry.total,
                bundle.source,
                item.item_id(),
                title,
                item.url()
            );
            let _ = writeln!(
                out,
                "![{}](cid:{})\n",
                item.media_url(),
                content_id(message.index, b + 1, entry)
            );
            if let Some(comment) = item.page.info_str("comment") {
                let _ = writeln!(out, "\"{}\"\n", comment);
            }
        }
    }

    out
}

/// HTML alternative, built from the same data as the Markdown body
pub fn render_html(message: &Message<ContentItem>) -> String {
    let mut out = String::from("<!DOCTYPE html>\n<html><body>\n");

    for (b, bundle) in message.bundles.iter().enumerate() {
        let label = bundle.sequence_label();
        let heading = if label.is_empty() {
            encode_text(&bundle.title).into_owned()
        } else {
            format!("{} {}", encode_text(&bundle.title), label)
        };
        let _ = writeln!(out, "<h1>{}</h1>", heading);

        for entry in &bundle.entries {
            let item = &entry.item;
            let title = item.title();
            let _ = writeln!(
                out,
                "<h2>({}/{}) {} #{} <a href=\"{}\">{}</a></h2>",
                entry.seq,
                entry.total,
                encode_text(&bundle.source),
                encode_text(item.item_id()),
                encode_double_quoted_attribute(item.url()),
                encode_text(title)
            );
            let _ = writeln!(
                out,
                "<p><img src=\"cid:{}\" alt=\"{}\"></p>",
                content_id(message.index, b + 1, entry),
                encode_double_quoted_attribute(item.media_url())
            );
            if let Some(comment) = item.page.info_str("comment") {
                let _ = writeln!(out, "<p><em>{}</em></p>", encode_text(comment));
            }
        }
    }

    out.push_str("</body></html>\n");
    out
}

/// RFC 2047 encode a header value when it is not plain ASCII
fn encode_header(value: &str) -> String {
    if value.is_ascii() {
        value.to_string()
    } else {
        format!("=?utf-8?b?{}?=", STANDARD.encode(value))
    }
}

fn wrap_base64(bytes: &[u8]) -> String {
    let encoded = STANDARD.encode(bytes);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / BASE64_LINE * 2 + 2);
    for chunk in encoded.as_bytes().chunks(BASE64_LINE) {
        // base64 output is ASCII, so every chunk is valid UTF-8
        out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        out.push_str("\r\n");
    }
    out
}

/// Render a message and assemble its MIME document
pub fn render_message(
    message: &Message<ContentItem>,
    settings: &DigestSettings,
    now: DateTime<Utc>,
) -> RenderedMessage {
    let subject = subject_line(&settings.subject, now, message.index, message.count);
    let markdown = render_markdown(message);
    let html = render_html(message);

    let related = format!("related-{}", Uuid::new_v4().simple());
    let alternative = format!("alternative-{}", Uuid::new_v4().simple());

    let mut doc = String::new();
    let _ = write!(doc, "From: {}\r\n", settings.from);
    if !settings.to.is_empty() {
        let _ = write!(doc, "To: {}\r\n", settings.to.join(", "));
    }
    let _ = write!(doc, "Subject: {}\r\n", encode_header(&subject));
    let _ = write!(doc, "Date: {}\r\n", now.to_rfc2822());
    doc.push_str("MIME-Version: 1.0\r\n");
    let _ = write!(
        doc,
        "Content-Type: multipart/related; boundary=\"{}\"; type=\"multipart/alternative\"\r\n\r\n",
        related
    );

    let _ = write!(doc, "--{}\r\n", related);
    let _ = write!(
        doc,
        "Content-Type: multipart/alternative; boundary=\"{}\"\r\n\r\n",
        alternative
    );
    for (mime, body) in [("text/plain", &markdown), ("text/html", &html)] {
        let _ = write!(doc, "--{}\r\n", alternative);
        let _ = write!(doc, "Content-Type: {}; charset=utf-8\r\n", mime);
        doc.push_str("Content-Transfer-Encoding: base64\r\n\r\n");
        doc.push_str(&wrap_base64(body.as_bytes()));
    }
    let _ = write!(doc, "--{}--\r\n", alternative);

    for (b, bundle) in message.bundles.iter().enumerate() {
        for entry in &bundle.entries {
            let name = attachment_name(entry);
            let _ = write!(doc, "--{}\r\n", related);
            let _ = write!(doc, "Content-Type: {}; name=\"{}\"\r\n", entry.item.mime, name);
            doc.push_str("Content-Transfer-Encoding: base64\r\n");
            let _ = write!(doc, "Content-ID: <{}>\r\n", content_id(message.index, b + 1, entry));
            let _ = write!(doc, "Content-Disposition: inline; filename=\"{}\"\r\n\r\n", name);
            doc.push_str(&wrap_base64(&entry.item.media));
        }
    }
    let _ = write!(doc, "--{}--\r\n", related);

    RenderedMessage {
        index: message.index,
        count: message.count,
        subject,
        from: settings.from.clone(),
        to: settings.to.clone(),
        markdown,
        html,
        document: doc,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::batcher::{DigestBatcher, DigestSource};
    use crate::domain::{Media, PageInfo};
    use chrono::TimeZone;

    fn item(id: &str, bytes: &[u8]) -> ContentItem {
        let page = PageInfo::new(id, format!("https://x.test/{}/", id), format!("https://img.x.test/{}.png", id))
            .with_info("title", format!("Title <{}>", id))
            .with_info("comment", "alt & text");
        ContentItem::new(
            "comic",
            page,
            Media {
                bytes: bytes.to_vec(),
                mime: "image/png".to_string(),
            },
            "png".to_string(),
        )
    }

    fn settings() -> DigestSettings {
        DigestSettings {
            to: vec!["me@example.com".to_string()],
            max_message_bytes: 4,
            ..DigestSettings::default()
        }
    }

    #[test]
    fn test_subject_line() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap();
        assert_eq!(subject_line("Harvest", now, 1, 3), "Harvest 2024-03-09 [1/3]");
    }

    #[test]
    fn test_render_split_bundle() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap();
        let messages = DigestBatcher::new(4).pack(vec![DigestSource::new(
            "comic",
            "Comic & Co",
            vec![item("1", b"abc"), item("2", b"def")],
        )]);
        assert_eq!(messages.len(), 2);

        let rendered = render_message(&messages[1], &settings(), now);
        assert_eq!(rendered.subject, "Harvest 2024-03-09 [2/2]");
        assert!(rendered.markdown.starts_with("# Comic & Co (2/2)\n"));
        assert!(rendered.markdown.contains("## (2/2) comic #2 [Title <2>](https://x.test/2/)"));
        assert!(rendered.markdown.contains("(cid:m2.b1.i2@gleaner)"));
        assert!(rendered.html.contains("<h1>Comic &amp; Co (2/2)</h1>"));
        assert!(rendered.html.contains("Title &lt;2&gt;"));
        assert!(rendered.html.contains("<em>alt &amp; text</em>"));
        assert!(rendered.html.contains("<a href=\"https://x.test/2/\">"));

        let doc = &rendered.document;
        assert!(doc.contains("To: me@example.com\r\n"));
        assert!(doc.contains("multipart/related"));
        assert!(doc.contains("multipart/alternative"));
        assert!(doc.contains("Content-ID: <m2.b1.i2@gleaner>\r\n"));
        assert!(doc.contains("Content-Disposition: inline; filename=\"comic-2.png\""));
        assert!(doc.contains(&STANDARD.encode(b"def")));
        assert!(!doc.contains(&STANDARD.encode(b"abc")));
    }

    #[test]
    fn test_html_attributes_stay_inside_quotes() {
        let page = PageInfo::new("7", "https://x.test/7/?a=1&b=\"2\"", "https://img.x.test/\"7\".png");
        let item = ContentItem::new(
            "comic",
            page,
            Media {
                bytes: b"x".to_vec(),
                mime: "image/png".to_string(),
            },
            "png".to_string(),
        );
        let messages = DigestBatcher::new(1024).pack(vec![DigestSource::new("comic", "Comic", vec![item])]);

        let html = render_html(&messages[0]);
        assert!(html.contains("href=\"https://x.test/7/?a=1&amp;b=&quot;2&quot;\""));
        assert!(html.contains("alt=\"https://img.x.test/&quot;7&quot;.png\""));
    }

    #[test]
    fn test_non_ascii_subject_is_encoded() {
        assert_eq!(encode_header("plain"), "plain");
        assert!(encode_header("Cosecha año").starts_with("=?utf-8?b?"));
    }
}
