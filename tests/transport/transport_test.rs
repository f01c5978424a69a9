use std::fs;

use pdbforensics::{
    config::ForensicsConfig,
    recovery::scan::Verdict,
    transport::{PathPolicy, Request, Response, execute},
    types::error::DatabaseError,
};
use tempfile::TempDir;

fn workspace() -> (TempDir, ForensicsConfig) {
    let dir = tempfile::Builder::new().prefix("pdb_transport").tempdir().unwrap();
    let config = ForensicsConfig::default()
        .with_allowed_dir(dir.path())
        .with_seed(17);
    (dir, config)
}

fn run(line: &str, config: &ForensicsConfig) -> Response {
    let request = Request::parse(line).unwrap();
    execute(&request, config).unwrap()
}

#[test]
fn test_path_policy_confines_paths() {
    let (dir, _) = workspace();
    let policy = PathPolicy::new(&[dir.path()]);

    let inside = dir.path().join("sub").join("..").join("export.pdb");
    let checked = policy.check(&inside).unwrap();
    assert!(checked.ends_with("export.pdb"));
    assert!(!checked.to_string_lossy().contains(".."));

    let escape = dir.path().join("..").join("elsewhere.pdb");
    assert!(matches!(
        policy.check(&escape),
        Err(DatabaseError::PathNotPermitted { .. })
    ));
}

#[test]
fn test_fixture_corrupt_scan_recover_pipeline() {
    let (dir, config) = workspace();
    let source = dir.path().join("export.pdb");
    let corrupt = dir.path().join("corrupt.pdb");
    let recovered = dir.path().join("recovered.pdb");

    match run(&format!("fixture {}", source.display()), &config) {
        Response::FixtureWritten { page_size, .. } => assert_eq!(page_size, 4096),
        other => panic!("unexpected {:?}", other),
    }

    match run(
        &format!("corrupt {} {} 1 4", source.display(), corrupt.display()),
        &config,
    ) {
        Response::Corrupted { reports, info } => {
            assert_eq!(reports.len(), 2);
            assert!(!info.signature_ok);
            assert_ne!(info.source_crc32, info.output_crc32);
        }
        other => panic!("unexpected {:?}", other),
    }

    match run(&format!("scan {}", corrupt.display()), &config) {
        Response::Scanned { findings } => {
            let damaged: Vec<&str> = findings
                .iter()
                .filter(|finding| finding.verdict != Verdict::Intact)
                .map(|finding| finding.region.as_str())
                .collect();
            assert_eq!(damaged, vec!["magic_header", "row_presence_bitmap"]);
        }
        other => panic!("unexpected {:?}", other),
    }

    match run(
        &format!(
            "recover_all {} {} {}",
            corrupt.display(),
            recovered.display(),
            source.display()
        ),
        &config,
    ) {
        Response::Recovered { success, report } => {
            assert!(success);
            assert_eq!(report.stats.succeeded, 10);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(fs::read(&recovered).unwrap(), fs::read(&source).unwrap());
}

#[test]
fn test_single_recover_request() {
    let (dir, config) = workspace();
    let source = dir.path().join("export.pdb");
    let corrupt = dir.path().join("corrupt.pdb");
    let recovered = dir.path().join("recovered.pdb");
    run(&format!("fixture {} 2048", source.display()), &config);
    run(
        &format!("corrupt {} {} table_index", source.display(), corrupt.display()),
        &config,
    );

    let response = run(
        &format!("recover {} {} 5", corrupt.display(), recovered.display()),
        &config,
    );
    let json = response.to_json().unwrap();
    assert!(json.contains("\"kind\": \"recovered\""));
    match response {
        Response::Recovered { success, report } => {
            assert!(success);
            assert_eq!(report.log.len(), 1);
            assert_eq!(report.stats.attempted, 1);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_requests_outside_allowed_dirs_are_refused() {
    let (dir, config) = workspace();
    let other = tempfile::tempdir().unwrap();
    let outside = other.path().join("export.pdb");

    let request = Request::parse(&format!("fixture {}", outside.display())).unwrap();
    assert!(matches!(
        execute(&request, &config),
        Err(DatabaseError::PathNotPermitted { .. })
    ));
    assert!(!outside.exists());

    let source = dir.path().join("export.pdb");
    run(&format!("fixture {}", source.display()), &config);
    let request = Request::parse(&format!(
        "corrupt {} {} 1",
        source.display(),
        outside.display()
    ))
    .unwrap();
    assert!(matches!(
        execute(&request, &config),
        Err(DatabaseError::PathNotPermitted { .. })
    ));
}

#[test]
fn test_seeded_config_reproduces_corruption() {
    let (dir, config) = workspace();
    let source = dir.path().join("export.pdb");
    let first = dir.path().join("first.pdb");
    let second = dir.path().join("second.pdb");
    run(&format!("fixture {}", source.display()), &config);
    run(&format!("corrupt {} {} all", source.display(), first.display()), &config);
    run(&format!("corrupt {} {} all", source.display(), second.display()), &config);
    assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());
}
