//! Atom fixtures and mock-server helpers shared by the integration tests.
#![allow(dead_code)]

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const FEED_ID: &str = "tag:example.test,2011:datasets";

/// One `<entry>` element. `extra` is spliced in verbatim (authors, links).
pub fn entry(id: &str, title: &str, updated: &str, extra: &str) -> String {
    format!(
        r#"  <entry>
    <id>{id}</id>
    <title>{title}</title>
    <updated>{updated}</updated>
    {extra}
  </entry>
"#
    )
}

/// Entry with a generated title and timestamp: `e3` is updated on day 3.
pub fn simple_entry(id: &str, day: u32) -> String {
    entry(
        id,
        &format!("Dataset {id}"),
        &format!("2011-01-{day:02}T00:00:00Z"),
        "",
    )
}

pub fn author(name: &str, email: Option<&str>) -> String {
    match email {
        Some(email) => format!("<author><name>{name}</name><email>{email}</email></author>"),
        None => format!("<author><name>{name}</name></author>"),
    }
}

pub fn enclosure(href: &str, media_type: Option<&str>, title: Option<&str>) -> String {
    let mut link = format!(r#"<link rel="enclosure" href="{href}""#);
    if let Some(t) = media_type {
        link.push_str(&format!(r#" type="{t}""#));
    }
    if let Some(t) = title {
        link.push_str(&format!(r#" title="{t}""#));
    }
    link.push_str("/>");
    link
}

/// A feed document listing `entries` in the given order, linking to
/// `previous` as its prev-archive page.
pub fn feed(entries: &[String], previous: Option<&str>) -> String {
    let prev = previous
        .map(|href| format!(r#"  <link rel="prev-archive" href="{href}"/>"#))
        .unwrap_or_default();
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <id>{FEED_ID}</id>
  <title>Example datasets</title>
  <updated>2011-02-01T00:00:00Z</updated>
{prev}
{}</feed>"#,
        entries.concat()
    )
}

pub async fn mount_page(server: &MockServer, page_path: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(page_path))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body)
                .insert_header("Content-Type", "application/atom+xml"),
        )
        .mount(server)
        .await;
}

pub async fn mount_file(server: &MockServer, file_path: &str, content: &[u8]) {
    Mock::given(method("GET"))
        .and(path(file_path))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.to_vec()))
        .mount(server)
        .await;
}

/// Mounts a three-page feed of six entries at `/feed.atom`.
///
/// Every page lists newest first, the way most publishers do:
/// `/feed.atom` holds e6 and e5, `/feed-2.atom` e4 and e3, `/feed-1.atom`
/// e2 and e1.
pub async fn mount_three_pages(server: &MockServer) {
    mount_page(
        server,
        "/feed.atom",
        feed(&[simple_entry("e6", 6), simple_entry("e5", 5)], Some("feed-2.atom")),
    )
    .await;
    mount_page(
        server,
        "/feed-2.atom",
        feed(&[simple_entry("e4", 4), simple_entry("e3", 3)], Some("feed-1.atom")),
    )
    .await;
    mount_page(
        server,
        "/feed-1.atom",
        feed(&[simple_entry("e2", 2), simple_entry("e1", 1)], None),
    )
    .await;
}

pub fn feed_url(server: &MockServer) -> String {
    format!("{}/feed.atom", server.uri())
}
