use std::fs;
use std::path::{Path, PathBuf};

/// Files allowed to call `submit_market_order` directly: the executor and
/// the gateway implementations it goes through.
const ALLOWED_DIRECT_SUBMIT_CALLERS: &[&str] = &[
    "src/strategy/executor.rs",
    "src/exchange/timeout.rs",
    "src/adapters/alpaca.rs",
];

fn collect_rust_files(root: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(root) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_rust_files(&path, out);
            continue;
        }
        if path.extension().and_then(|s| s.to_str()) == Some("rs") {
            out.push(path);
        }
    }
}

fn source_files() -> Vec<(String, String)> {
    let repo_root = Path::new(env!("CARGO_MANIFEST_DIR"));
    let mut files = Vec::new();
    collect_rust_files(&repo_root.join("src"), &mut files);
    files
        .into_iter()
        .map(|file| {
            let rel = file
                .strip_prefix(repo_root)
                .unwrap_or(&file)
                .to_string_lossy()
                .replace('\\', "/");
            let content = fs::read_to_string(&file).unwrap_or_default();
            (rel, content)
        })
        .collect()
}

#[test]
fn order_submission_is_limited_to_executor() {
    let mut offenders = Vec::new();
    for (rel, content) in source_files() {
        if ALLOWED_DIRECT_SUBMIT_CALLERS.iter().any(|allowed| *allowed == rel) {
            continue;
        }
        for (idx, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.contains(".submit_market_order(") {
                offenders.push(format!("{rel}:{}: {}", idx + 1, trimmed));
            }
        }
    }

    assert!(
        offenders.is_empty(),
        "order submission outside the executor:\n{}",
        offenders.join("\n")
    );
}

#[test]
fn only_the_refit_scheduler_publishes_snapshots() {
    let mut offenders = Vec::new();
    for (rel, content) in source_files() {
        if rel == "src/strategy/refit.rs" || rel == "src/strategy/regime_store.rs" {
            continue;
        }
        for (idx, line) in content.lines().enumerate() {
            if line.contains(".publish(") {
                offenders.push(format!("{rel}:{}: {}", idx + 1, line.trim()));
            }
        }
    }

    assert!(
        offenders.is_empty(),
        "regime snapshot written outside the refit scheduler:\n{}",
        offenders.join("\n")
    );
}
