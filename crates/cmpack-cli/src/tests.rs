use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::anyhow;
use clap::CommandFactory;

use cmpack_core::Error;
use cmpack_installer::{LicenseChoice, PackRootLayout};

use crate::commands::{
    exit_code_for, format_cached_lines, format_installed_lines, format_public_lines, ErrorReporter,
};
use crate::render::{encoded_step, format_encoded_progress, format_encoded_start};
use crate::ui::parse_license_answer;
use crate::Cli;

#[test]
fn cli_definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn reporter_suppresses_consecutive_duplicates() {
    let mut reporter = ErrorReporter::default();
    let first = anyhow!("something broke");
    assert!(reporter.report(&first));
    assert!(!reporter.report(&anyhow!("something broke")));
    assert!(reporter.report(&anyhow!("something else broke")));
    assert!(reporter.report(&anyhow!("something broke")));
}

#[test]
fn reporter_keeps_extract_sentinel_quiet() {
    let mut reporter = ErrorReporter::default();
    assert!(!reporter.report(&anyhow::Error::from(Error::ExtractEula)));
}

#[test]
fn exit_codes_distinguish_interrupts() {
    assert_eq!(
        exit_code_for(&anyhow::Error::from(Error::TerminatedByUser)),
        130
    );
    assert_eq!(exit_code_for(&anyhow::Error::from(Error::Eula)), 1);
    assert_eq!(exit_code_for(&anyhow!("plain failure")), 1);
}

#[test]
fn license_answers_map_to_choices() {
    assert_eq!(parse_license_answer("a\n"), LicenseChoice::Agree);
    assert_eq!(parse_license_answer("A"), LicenseChoice::Agree);
    assert_eq!(parse_license_answer("accept"), LicenseChoice::Agree);
    assert_eq!(parse_license_answer("E"), LicenseChoice::Extract);
    assert_eq!(parse_license_answer("d"), LicenseChoice::Decline);
    assert_eq!(parse_license_answer(""), LicenseChoice::Decline);
    assert_eq!(parse_license_answer("yes"), LicenseChoice::Decline);
}

#[test]
fn encoded_progress_formats() {
    assert_eq!(format_encoded_start("extract", 12), "[S|extract|12]");
    assert_eq!(format_encoded_progress(6, 12), "[P|6|12]");

    assert_eq!(encoded_step(0, 200), 0);
    assert_eq!(encoded_step(100, 200), 50);
    assert_eq!(encoded_step(300, 200), 100);
    // Unknown totals advance in mebibytes.
    assert_eq!(encoded_step(1024 * 1024 + 1, 0), 1);
}

#[test]
fn list_lines_cover_all_three_views() {
    let layout = test_layout("list");
    fs::create_dir_all(
        layout
            .pack_root()
            .join("TheVendor")
            .join("ThePack")
            .join("1.0.0"),
    )
    .expect("must create tree");
    fs::write(
        layout.download_dir().join("TheVendor.ThePack.1.0.0.pack"),
        b"zip bytes",
    )
    .expect("must write cached archive");
    fs::write(
        layout.download_dir().join("TheVendor.ThePack.1.0.0.pdsc"),
        b"<package/>",
    )
    .expect("must write cached pdsc");
    fs::write(
        layout.web_dir().join("Public.Pack.pdsc"),
        "<package><vendor>Public</vendor><name>Pack</name><releases>\
         <release version=\"3.2.1\"/></releases></package>",
    )
    .expect("must write web pdsc");

    assert_eq!(
        format_installed_lines(&layout).expect("must list installed"),
        vec!["TheVendor.ThePack.1.0.0"]
    );
    assert_eq!(
        format_cached_lines(&layout).expect("must list cached"),
        vec!["TheVendor.ThePack.1.0.0.pack"]
    );
    assert_eq!(
        format_public_lines(&layout).expect("must list public"),
        vec!["Public.Pack (latest 3.2.1)"]
    );

    let _ = fs::remove_dir_all(layout.pack_root());
}

fn test_layout(tag: &str) -> PackRootLayout {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let mut path = std::env::temp_dir();
    path.push(format!(
        "cmpack-cli-{tag}-{}-{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::SeqCst)
    ));
    let layout = PackRootLayout::new(PathBuf::from(&path));
    layout.ensure_base_dirs().expect("must create pack root");
    layout
}
