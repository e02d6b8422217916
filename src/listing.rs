// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Extract directory listings from autoindex-style HTML documents.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime};
use ego_tree::NodeRef;
use log::debug;
use percent_encoding::percent_decode_str;
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};

use crate::entry::{
    human_to_bytes, match_size_prefix, parse_datetime, parse_datetime_prefix, FileEntry,
    RE_ISO8601,
};
use crate::error::FsError;

/// Result of parsing one listing document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    /// The directory label announced by the page (`Index of <label>`).
    pub label: Option<String>,
    /// Extracted entries in document order.
    pub entries: Vec<FileEntry>,
}

/// Column roles a table header cell can resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnRole {
    Name,
    Modified,
    Size,
    Description,
    Signature,
}

static SEL_TITLE: LazyLock<Selector> = LazyLock::new(|| sel("title"));
static SEL_H1: LazyLock<Selector> = LazyLock::new(|| sel("h1"));
static SEL_IMG: LazyLock<Selector> = LazyLock::new(|| sel("img"));
static SEL_PRE: LazyLock<Selector> = LazyLock::new(|| sel("pre"));
static SEL_A: LazyLock<Selector> = LazyLock::new(|| sel("a"));
static SEL_HR: LazyLock<Selector> = LazyLock::new(|| sel("hr"));
static SEL_TABLE: LazyLock<Selector> = LazyLock::new(|| sel("table"));
static SEL_TR: LazyLock<Selector> = LazyLock::new(|| sel("tr"));
static SEL_TH: LazyLock<Selector> = LazyLock::new(|| sel("th"));
static SEL_TD: LazyLock<Selector> = LazyLock::new(|| sel("td"));
static SEL_TIME: LazyLock<Selector> = LazyLock::new(|| sel("time"));
static SEL_UL: LazyLock<Selector> = LazyLock::new(|| sel("ul"));
static SEL_LI: LazyLock<Selector> = LazyLock::new(|| sel("li"));

static RE_COMMONHEAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("(?i)Name|(Last )?modifi(ed|cation)|date|Size|Description|Metadata|Type|Parent Directory")
        .expect("header regex")
});
static RE_HEAD_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("name$|^file|^download").expect("name-role regex"));
static RE_HEAD_MOD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("modifi|^uploaded|date|time").expect("modified-role regex"));
static RE_HEAD_SIZE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("size|bytes$").expect("size-role regex"));
static RE_ABSPATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^((ht|f)tps?:/)?/").expect("abs-path regex"));

/// Characters stripped from header and description cells.
const CELL_TRIM: &[char] = &[' ', '\t', '\n', '\r', '\u{b}', '\u{c}', '\u{a0}'];
/// Header cells additionally shed sort-direction arrows.
const HEAD_TRIM: &[char] = &[' ', '\t', '\n', '\r', '\u{b}', '\u{c}', '\u{a0}', '↑', '↓'];

fn sel(css: &str) -> Selector {
    Selector::parse(css).expect("selector")
}

/// Parse an autoindex-style HTML document into a [`Listing`].
///
/// The three extraction strategies (preformatted block, header-bearing
/// table, bare list) are mutually exclusive and tried in that order. A
/// document none of them matches yields an empty listing rather than an
/// error; the only hard failure is a table whose data rows carry more
/// cells than the detected column schema.
pub fn parse(mut document: Html) -> Result<Listing, FsError> {
    let label = extract_label(&document);
    detach_images(&mut document);

    let entries = if let Some(pre) = qualifying_pre(&document) {
        parse_pre(pre)
    } else if let Some(table) = qualifying_table(&document) {
        parse_table(table)?
    } else if let Some(ul) = document.select(&SEL_UL).next() {
        parse_list(ul)
    } else {
        Vec::new()
    };
    Ok(Listing { label, entries })
}

/// Convenience wrapper: parse a raw HTML string.
pub fn parse_str(html: &str) -> Result<Listing, FsError> {
    parse(Html::parse_document(html))
}

fn extract_label(document: &Html) -> Option<String> {
    if let Some(title) = document.select(&SEL_TITLE).next() {
        let text: String = title.text().collect();
        if let Some(rest) = text.strip_prefix("Index of ") {
            return Some(rest.to_owned());
        }
    }
    if let Some(h1) = document.select(&SEL_H1).next() {
        let text: String = h1.text().collect();
        if let Some(rest) = text.trim().strip_prefix("Index of ") {
            return Some(rest.to_owned());
        }
    }
    None
}

/// Inline images add no structural signal and corrupt sibling-text
/// heuristics, so they are dropped up front.
fn detach_images(document: &mut Html) {
    let ids: Vec<_> = document.select(&SEL_IMG).map(|img| img.id()).collect();
    for id in ids {
        if let Some(mut node) = document.tree.get_mut(id) {
            node.detach();
        }
    }
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect()
}

/// Derive an entry name from an anchor href: decode, strip trailing
/// slashes, keep the basename, and restore the directory marker.
fn href_to_name(href: &str) -> String {
    let is_dir = href.ends_with('/');
    let decoded = percent_decode_str(href.trim_end_matches('/')).decode_utf8_lossy();
    let base = decoded.rsplit('/').next().unwrap_or_default();
    let mut name = base.to_owned();
    if is_dir {
        name.push('/');
    }
    name
}

fn qualifying_pre(document: &Html) -> Option<ElementRef<'_>> {
    document.select(&SEL_PRE).find(|pre| {
        pre.select(&SEL_A)
            .any(|a| !element_text(a).trim().is_empty())
    })
}

fn qualifying_table(document: &Html) -> Option<ElementRef<'_>> {
    document
        .select(&SEL_TABLE)
        .find(|table| table.text().any(|text| RE_COMMONHEAD.is_match(text)))
}

/// Accumulator for the pre strategy's link-then-text rhythm.
#[derive(Default)]
struct PendingEntry {
    name: String,
    modified: Option<NaiveDateTime>,
    size: Option<u64>,
    description: Option<String>,
}

impl PendingEntry {
    fn start(name: String) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    fn finish(self) -> FileEntry {
        FileEntry {
            name: self.name,
            modified: self.modified,
            size: self.size,
            description: self.description,
        }
    }
}

/// Strategy (a): a `<pre>` block interleaving anchors with raw text lines.
fn parse_pre(pre: ElementRef<'_>) -> Vec<FileEntry> {
    let nodes: Vec<NodeRef<'_, Node>> = match pre.select(&SEL_HR).next() {
        Some(hr) => hr.next_siblings().collect(),
        None => pre.children().collect(),
    };
    let mut entries = Vec::new();
    let mut started = false;
    let mut pending: Option<PendingEntry> = None;

    for node in nodes {
        if let Some(element) = ElementRef::wrap(node) {
            if element.value().name() != "a" {
                continue;
            }
            let text = element_text(element);
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            let Some(href) = element.value().attr("href") else {
                continue;
            };
            if started {
                if let Some(done) = pending.take() {
                    entries.push(done.finish());
                }
                pending = Some(PendingEntry::start(href_to_name(href)));
            } else if matches!(text, "Parent Directory" | ".." | "../") {
                // The parent pointer signals the entry area without
                // being an entry itself.
                started = true;
            } else if !href.is_empty() && !href.starts_with(['?', '/']) {
                // A plain relative href is already the first entry;
                // column-sorter links (`?C=N`) never are.
                started = true;
                pending = Some(PendingEntry::start(href_to_name(href)));
            }
        } else if let Some(text) = node.value().as_text() {
            let line = text.replace('\r', "");
            let line = line.split('\n').next().unwrap_or_default();
            let mut line = line.trim_start();
            if let Some((dt, consumed)) = parse_datetime_prefix(line) {
                if let Some(pending) = pending.as_mut() {
                    pending.modified = Some(dt);
                }
                line = line[consumed..].trim_start();
            }
            if let Some((size_text, consumed)) = match_size_prefix(line) {
                if let Some(pending) = pending.as_mut() {
                    pending.size = if size_text == "-" {
                        None
                    } else {
                        human_to_bytes(&size_text.replace([' ', ','], ""))
                    };
                }
                line = line[consumed..].trim_start();
            }
            let description = line.trim_end();
            if !description.is_empty() {
                if let Some(pending) = pending.as_mut() {
                    if description == "/" {
                        // A bare slash marks the previous entry as a
                        // directory instead of describing it.
                        pending.name.push('/');
                    } else {
                        pending.description = Some(description.to_owned());
                    }
                }
            }
        }
    }
    if let Some(done) = pending.take() {
        entries.push(done.finish());
    }
    entries
}

fn header_cells<'a>(row: ElementRef<'a>) -> Vec<ElementRef<'a>> {
    let ths: Vec<_> = row.select(&SEL_TH).collect();
    if ths.is_empty() {
        row.select(&SEL_TD).collect()
    } else {
        ths
    }
}

/// Resolve one header row into a column-role schema. Returns `None` when
/// the row cannot be mapped (a spanning cell hides column boundaries).
fn detect_schema(row: ElementRef<'_>) -> Option<Vec<ColumnRole>> {
    let mut schema = Vec::new();
    let mut name_found = false;
    for cell in header_cells(row) {
        if cell.value().attr("colspan").is_some() {
            return None;
        }
        let text = element_text(cell);
        let text = text.trim_matches(HEAD_TRIM).to_lowercase();
        if text.is_empty() {
            continue;
        }
        if !name_found && RE_HEAD_NAME.is_match(&text) {
            schema.push(ColumnRole::Name);
            name_found = true;
        } else if text == "size" {
            schema.push(ColumnRole::Size);
        } else if text == "description" {
            schema.push(ColumnRole::Description);
        } else if RE_HEAD_MOD.is_match(&text) {
            schema.push(ColumnRole::Modified);
        } else if RE_HEAD_SIZE.is_match(&text) {
            schema.push(ColumnRole::Size);
        } else if text.ends_with("signature") {
            schema.push(ColumnRole::Signature);
        } else {
            schema.push(ColumnRole::Description);
        }
    }
    if schema.is_empty() {
        schema = vec![
            ColumnRole::Name,
            ColumnRole::Modified,
            ColumnRole::Size,
            ColumnRole::Description,
        ];
    } else if !name_found {
        schema[0] = ColumnRole::Name;
    }
    Some(schema)
}

fn in_head_or_foot(row: ElementRef<'_>) -> bool {
    row.parent()
        .and_then(|parent| parent.value().as_element().map(|el| el.name().to_owned()))
        .map(|name| name == "thead" || name == "tfoot")
        .unwrap_or(false)
}

fn sort_key(cell: ElementRef<'_>) -> Option<&str> {
    cell.value().attr("data-sort-value")
}

/// Strategy (b): the first table carrying a recognized header vocabulary.
fn parse_table(table: ElementRef<'_>) -> Result<Vec<FileEntry>, FsError> {
    let mut entries = Vec::new();
    let mut schema: Vec<ColumnRole> = Vec::new();
    let mut started = false;

    for row in table.select(&SEL_TR) {
        if !started {
            if row.select(&SEL_HR).next().is_some() {
                if schema.is_empty() {
                    schema = vec![
                        ColumnRole::Name,
                        ColumnRole::Modified,
                        ColumnRole::Size,
                        ColumnRole::Description,
                    ];
                }
                started = true;
            } else if row.text().any(|text| RE_COMMONHEAD.is_match(text)) {
                match detect_schema(row) {
                    Some(detected) => {
                        schema = detected;
                        started = true;
                    }
                    None => debug!("skipping header row with column spans"),
                }
            }
            continue;
        }
        if in_head_or_foot(row) || row.select(&SEL_TH).next().is_some() {
            continue;
        }
        if let Some(entry) = parse_table_row(row, &schema)? {
            entries.push(entry);
        }
    }
    Ok(entries)
}

fn parse_table_row(
    row: ElementRef<'_>,
    schema: &[ColumnRole],
) -> Result<Option<FileEntry>, FsError> {
    let mut column = 0usize;
    let mut name: Option<String> = None;
    let mut modified = None;
    let mut size = None;
    let mut description: Option<String> = None;

    for cell in row.select(&SEL_TD) {
        if column >= schema.len() {
            return Err(FsError::Parse(
                "table row has more cells than detected columns".to_owned(),
            ));
        }
        if cell.value().attr("colspan").is_some() {
            continue;
        }
        match schema[column] {
            ColumnRole::Name => {
                let Some(anchor) = cell.select(&SEL_A).next() else {
                    continue;
                };
                let text = element_text(anchor);
                let text = text.trim();
                let href = anchor.value().attr("href").unwrap_or_default();
                if text.is_empty() || href.is_empty() || href.starts_with('#') {
                    continue;
                }
                if text == "Parent Directory" || href == "../" {
                    return Ok(None);
                }
                name = Some(href_to_name(href));
                column = 1;
            }
            ColumnRole::Modified => {
                modified = extract_modified(cell);
                column += 1;
            }
            ColumnRole::Size => {
                size = extract_size(cell);
                column += 1;
            }
            ColumnRole::Description => {
                if description.is_none() {
                    let inner = cell.inner_html();
                    let inner = inner.trim_matches(CELL_TRIM);
                    if !inner.is_empty() {
                        description = Some(inner.to_owned());
                    }
                }
                column += 1;
            }
            ColumnRole::Signature => {
                if column > 0 {
                    column += 1;
                }
            }
        }
    }
    Ok(name.map(|name| FileEntry {
        name,
        modified,
        size,
        description,
    }))
}

fn extract_modified(cell: ElementRef<'_>) -> Option<NaiveDateTime> {
    // A machine-readable datetime attribute beats the rendered text.
    if let Some(time) = cell.select(&SEL_TIME).next() {
        if let Some(stamp) = time.value().attr("datetime") {
            if RE_ISO8601.is_match(stamp) {
                if let Ok(dt) = NaiveDateTime::parse_from_str(stamp, "%Y-%m-%dT%H:%M:%SZ") {
                    return Some(dt);
                }
            }
        }
    }
    let text = element_text(cell);
    let text = text.trim();
    if !text.is_empty() {
        if let Some(dt) = parse_datetime(text) {
            return Some(dt);
        }
    }
    sort_key(cell)
        .and_then(|value| value.parse::<i64>().ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.naive_utc())
}

fn extract_size(cell: ElementRef<'_>) -> Option<u64> {
    let text = element_text(cell);
    let text = text.trim().replace(',', "");
    if text.is_empty() || text == "-" {
        return None;
    }
    if let Some(raw) = sort_key(cell) {
        return raw.parse::<u64>().ok();
    }
    match_size_prefix(&text).and_then(|(found, _)| human_to_bytes(&found.replace(' ', "")))
}

/// Strategy (c): a bare `<ul>` of links, names taken verbatim from hrefs.
fn parse_list(ul: ElementRef<'_>) -> Vec<FileEntry> {
    let mut entries = Vec::new();
    for item in ul.select(&SEL_LI) {
        let Some(anchor) = item.select(&SEL_A).next() else {
            continue;
        };
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let name = percent_decode_str(href).decode_utf8_lossy().into_owned();
        if matches!(
            name.as_str(),
            "Parent Directory" | "." | "./" | ".." | "../" | "#"
        ) || RE_ABSPATH.is_match(&name)
        {
            continue;
        }
        entries.push(FileEntry::named(name));
    }
    entries
}
