// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Validate listing extraction across the three strategies.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use chrono::{NaiveDate, Timelike};
use indexfs::error::FsError;
use indexfs::listing::parse_str;

#[test]
fn pre_round_trip_extracts_all_fields() {
    let html = r#"<html><body><pre>
<a href="file.txt">file.txt</a>                 01-Jan-2020 00:00  1.0K  A file
</pre></body></html>"#;
    let listing = parse_str(html).expect("parse");
    assert_eq!(listing.entries.len(), 1);
    let entry = &listing.entries[0];
    assert_eq!(entry.name, "file.txt");
    assert_eq!(
        entry.modified,
        NaiveDate::from_ymd_opt(2020, 1, 1).and_then(|d| d.and_hms_opt(0, 0, 0))
    );
    assert_eq!(entry.size, Some(1024));
    assert_eq!(entry.description.as_deref(), Some("A file"));
}

#[test]
fn pre_strategy_skips_sorters_and_parent_links() {
    let html = r#"<html><head><title>Index of /pub</title></head><body><pre>
<a href="?C=N;O=D">Name</a> <a href="?C=M;O=A">Last modified</a> <a href="?C=S;O=A">Size</a>
<hr>
<a href="/">Parent Directory</a>                      -
<a href="alpha.iso">alpha.iso</a>         02-Feb-2021 10:30  1G
<a href="sub/">sub/</a>                   02-Feb-2021 10:31    -
</pre></body></html>"#;
    let listing = parse_str(html).expect("parse");
    assert_eq!(listing.label.as_deref(), Some("/pub"));
    let names: Vec<_> = listing.entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, ["alpha.iso", "sub/"]);
    assert_eq!(listing.entries[0].size, Some(1_073_741_824));
    assert_eq!(listing.entries[1].size, None);
}

#[test]
fn pre_slash_description_marks_a_directory() {
    let html = r#"<pre>
<a href="Parent">Parent Directory</a>
<a href="sub">sub</a>      01-Jan-2020 00:00    -  /
</pre>"#;
    let listing = parse_str(html).expect("parse");
    assert_eq!(listing.entries.len(), 1);
    let entry = &listing.entries[0];
    assert_eq!(entry.name, "sub/");
    assert!(entry.is_dir());
    assert_eq!(entry.description, None);
}

#[test]
fn pre_wins_over_a_header_bearing_table() {
    let html = r#"<html><body>
<pre><a href="from-pre.txt">from-pre.txt</a>  2020-01-02 03:04  12</pre>
<table><tr><th>Name</th><th>Size</th></tr>
<tr><td><a href="from-table.txt">from-table.txt</a></td><td>34</td></tr></table>
</body></html>"#;
    let listing = parse_str(html).expect("parse");
    assert_eq!(listing.entries.len(), 1);
    assert_eq!(listing.entries[0].name, "from-pre.txt");
}

#[test]
fn table_headers_detect_roles_despite_casing_and_whitespace() {
    let html = r#"<table>
<tr><th>  NAME </th><th> LAST MODIFIED </th><th>Size</th><th> Description </th></tr>
<tr><td><a href="data.bin">data.bin</a></td><td>2020-01-02 03:04</td><td>2,048</td><td>Binary blob</td></tr>
<tr><td><a href="../">Parent Directory</a></td><td></td><td></td><td></td></tr>
</table>"#;
    let listing = parse_str(html).expect("parse");
    assert_eq!(listing.entries.len(), 1);
    let entry = &listing.entries[0];
    assert_eq!(entry.name, "data.bin");
    let modified = entry.modified.expect("modified");
    assert_eq!((modified.hour(), modified.minute()), (3, 4));
    assert_eq!(entry.size, Some(2048));
    assert_eq!(entry.description.as_deref(), Some("Binary blob"));
}

#[test]
fn table_prefers_machine_readable_attributes() {
    let html = r#"<table>
<tr><th>File</th><th>Date</th><th>Bytes</th></tr>
<tr><td><a href="a.txt">a.txt</a></td>
<td><time datetime="2020-01-02T03:04:05Z">a while ago</time></td>
<td data-sort-value="12345">12 K</td></tr>
<tr><td><a href="b.txt">b.txt</a></td>
<td data-sort-value="1577836800">whenever</td>
<td>-</td></tr>
</table>"#;
    let listing = parse_str(html).expect("parse");
    assert_eq!(listing.entries.len(), 2);
    assert_eq!(listing.entries[0].size, Some(12345));
    let modified = listing.entries[0].modified.expect("iso attribute");
    assert_eq!((modified.hour(), modified.second()), (3, 5));
    // 2020-01-01T00:00:00Z as a raw sort key.
    let modified = listing.entries[1].modified.expect("sort key");
    assert_eq!(
        modified,
        NaiveDate::from_ymd_opt(2020, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .expect("timestamp")
    );
    assert_eq!(listing.entries[1].size, None);
}

#[test]
fn table_with_spanning_header_yields_nothing() {
    let html = r#"<table>
<tr><th colspan="3">Name and Last modified and Size</th></tr>
<tr><td><a href="x.txt">x.txt</a></td><td>2020-01-02</td><td>1</td></tr>
</table>"#;
    let listing = parse_str(html).expect("parse");
    assert!(listing.entries.is_empty());
}

#[test]
fn table_row_with_extra_cells_is_a_hard_failure() {
    let html = r#"<table>
<tr><th>Name</th><th>Size</th></tr>
<tr><td><a href="x.txt">x.txt</a></td><td>1</td><td>surprise</td></tr>
</table>"#;
    let err = parse_str(html).expect_err("schema mismatch");
    assert!(matches!(err, FsError::Parse(_)), "{err:?}");
}

#[test]
fn bare_list_excludes_placeholders_and_absolute_links() {
    let html = r##"<ul>
<li><a href="../">Parent</a></li>
<li><a href="#">top</a></li>
<li><a href="http://elsewhere.example.org/x">mirror</a></li>
<li><a href="/abs/path">abs</a></li>
<li><a href="sub/">sub/</a></li>
<li><a href="note%20a.txt">note a.txt</a></li>
</ul>"##;
    let listing = parse_str(html).expect("parse");
    let names: Vec<_> = listing.entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, ["sub/", "note a.txt"]);
    assert!(listing.entries.iter().all(|e| e.size.is_none()));
}

#[test]
fn unmatched_documents_degrade_to_an_empty_listing() {
    let listing = parse_str("<html><body><p>nothing here</p></body></html>").expect("parse");
    assert_eq!(listing.label, None);
    assert!(listing.entries.is_empty());
}
