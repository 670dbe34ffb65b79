use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use cmpack_core::{Error, PackIdent, Pdsc};

use crate::{lookup_public, pack_download_url, Pidx, WebIndex};

#[test]
fn web_pdsc_presence_defines_public() {
    let web_dir = test_dir("public");
    fs::write(
        web_dir.join("TheVendor.ThePack.pdsc"),
        pdsc_document("TheVendor", "ThePack", Some("https://example.com/packs/")),
    )
    .expect("must write pdsc");

    let web = WebIndex::new(&web_dir);
    let lookup = lookup_public(&web, &ident("TheVendor", "ThePack")).expect("must look up");
    assert!(lookup.is_public());
    assert!(lookup.pdsc.is_some());
    assert!(lookup.pending_pdsc_url.is_none());

    let missing = lookup_public(&web, &ident("Other", "Pack")).expect("must look up");
    assert!(!missing.is_public());

    let _ = fs::remove_dir_all(&web_dir);
}

#[test]
fn pidx_entry_marks_pack_public_without_cached_pdsc() {
    let web_dir = test_dir("pidx");
    fs::write(
        web_dir.join("index.pidx"),
        r#"<?xml version="1.0" encoding="UTF-8"?>
<index schemaVersion="1.1.0">
  <vendor>Keil</vendor>
  <url>https://example.com/index/</url>
  <pindex>
    <pdsc url="https://vendor.example.com/packs" vendor="TheVendor" name="ThePack" version="2.0.0"/>
  </pindex>
  <extension>ignored</extension>
</index>
"#,
    )
    .expect("must write pidx");

    let web = WebIndex::new(&web_dir);
    let lookup = lookup_public(&web, &ident("TheVendor", "ThePack")).expect("must look up");
    assert!(lookup.is_public());
    assert!(lookup.pdsc.is_none());
    assert_eq!(
        lookup.pending_pdsc_url.as_deref(),
        Some("https://vendor.example.com/packs/TheVendor.ThePack.pdsc")
    );

    let _ = fs::remove_dir_all(&web_dir);
}

#[test]
fn pidx_parses_entries_and_lookup() {
    let pidx = Pidx::from_xml(
        r#"<index><pindex>
            <pdsc url="https://a.example/" vendor="A" name="One" version="1.0.0"/>
            <pdsc url="https://b.example/dir" vendor="B" name="Two"/>
        </pindex></index>"#,
    )
    .expect("must parse");

    assert_eq!(pidx.entries().len(), 2);
    let entry = pidx.find(&ident("B", "Two")).expect("entry must exist");
    assert_eq!(entry.pdsc_url(), "https://b.example/dir/B.Two.pdsc");
    assert!(pidx.find(&ident("C", "Three")).is_none());
}

#[test]
fn download_url_from_base_url() {
    let pdsc = parse_pdsc("TheVendor", "ThePack", Some("https://example.com/packs/"));
    let url = pack_download_url(&pdsc, &ident("TheVendor", "ThePack"), "1.1.0")
        .expect("must determine url");
    assert_eq!(url, "https://example.com/packs/TheVendor.ThePack.1.1.0.pack");
}

#[test]
fn download_url_prefers_release_url() {
    let document = r#"<package>
  <vendor>V</vendor><name>N</name>
  <url>https://example.com/base/</url>
  <releases>
    <release version="2.0.0" url="mirrors/V.N.2.0.0.pack"/>
    <release version="1.0.0" url="https://cdn.example.com/V.N.1.0.0.pack"/>
  </releases>
</package>"#;
    let pdsc = Pdsc::from_xml(document).expect("must parse");

    let relative = pack_download_url(&pdsc, &ident("V", "N"), "2.0.0").expect("must determine");
    assert_eq!(relative, "https://example.com/base/mirrors/V.N.2.0.0.pack");

    let absolute = pack_download_url(&pdsc, &ident("V", "N"), "1.0.0").expect("must determine");
    assert_eq!(absolute, "https://cdn.example.com/V.N.1.0.0.pack");
}

#[test]
fn download_url_without_any_source_fails() {
    let pdsc = parse_pdsc("V", "N", None);
    let err = pack_download_url(&pdsc, &ident("V", "N"), "1.1.0").expect_err("must fail");
    assert_eq!(
        err.downcast_ref::<Error>(),
        Some(&Error::PackUrlCannotBeFound)
    );
}

#[test]
fn list_pdsc_files_ignores_other_entries() {
    let web_dir = test_dir("list");
    fs::write(web_dir.join("A.One.pdsc"), pdsc_document("A", "One", None))
        .expect("must write pdsc");
    fs::write(web_dir.join("B.Two.pdsc"), pdsc_document("B", "Two", None))
        .expect("must write pdsc");
    fs::write(web_dir.join("index.pidx"), "<index/>").expect("must write pidx");

    let web = WebIndex::new(&web_dir);
    let files = web.list_pdsc_files().expect("must list");
    let names: Vec<_> = files
        .iter()
        .filter_map(|path| path.file_name().and_then(|name| name.to_str()))
        .collect();
    assert_eq!(names, vec!["A.One.pdsc", "B.Two.pdsc"]);

    let _ = fs::remove_dir_all(&web_dir);
}

fn ident(vendor: &str, name: &str) -> PackIdent {
    PackIdent {
        vendor: vendor.to_string(),
        name: name.to_string(),
    }
}

fn pdsc_document(vendor: &str, name: &str, base_url: Option<&str>) -> String {
    let url_tag = base_url
        .map(|url| format!("<url>{url}</url>"))
        .unwrap_or_default();
    format!(
        "<package><vendor>{vendor}</vendor><name>{name}</name>{url_tag}<releases>\
         <release version=\"1.1.0\" date=\"2024-03-01\"/>\
         <release version=\"1.0.0\" date=\"2024-01-01\"/>\
         </releases></package>"
    )
}

fn parse_pdsc(vendor: &str, name: &str, base_url: Option<&str>) -> Pdsc {
    Pdsc::from_xml(&pdsc_document(vendor, name, base_url)).expect("fixture must parse")
}

fn test_dir(tag: &str) -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let mut path = std::env::temp_dir();
    path.push(format!(
        "cmpack-index-{tag}-{}-{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::SeqCst)
    ));
    fs::create_dir_all(&path).expect("must create test dir");
    path
}
