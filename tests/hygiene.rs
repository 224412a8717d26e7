//! Source budgets for the stream client.
//!
//! The event loop is a single task: a panic in it, a blocking call, or an
//! unbounded queue between the transport and the loop takes the whole client
//! down. Each rule below counts one pattern in non-test sources and fails when
//! the count exceeds its budget. Lower a budget when a hit goes away.

use std::fs;
use std::path::{Path, PathBuf};

/// Which sources a rule scans.
#[derive(Clone, Copy)]
enum Scope {
    /// The library and the wire codec.
    Library,
    /// The library, the wire codec and the CLI.
    Workspace,
}

struct Budget {
    pattern: &'static str,
    max: usize,
    scope: Scope,
    reason: &'static str,
}

const BUDGETS: &[Budget] = &[
    Budget { pattern: ".unwrap()", max: 0, scope: Scope::Workspace, reason: "errors propagate as StreamError" },
    Budget { pattern: ".expect(", max: 0, scope: Scope::Workspace, reason: "errors propagate as StreamError" },
    Budget { pattern: "panic!(", max: 0, scope: Scope::Workspace, reason: "a panic ends the stream task" },
    Budget { pattern: "unreachable!(", max: 0, scope: Scope::Workspace, reason: "a panic ends the stream task" },
    Budget { pattern: "todo!(", max: 0, scope: Scope::Workspace, reason: "a panic ends the stream task" },
    Budget { pattern: "dbg!(", max: 0, scope: Scope::Workspace, reason: "use tracing" },
    Budget { pattern: "unsafe", max: 0, scope: Scope::Workspace, reason: "no unsafe code" },
    Budget {
        pattern: "thread::sleep",
        max: 0,
        scope: Scope::Workspace,
        reason: "blocks the runtime; use tokio::time",
    },
    Budget {
        pattern: "let _ =",
        max: 0,
        scope: Scope::Library,
        reason: "a failed channel send is logged, not dropped",
    },
    Budget {
        pattern: ".ok()",
        max: 4,
        scope: Scope::Library,
        reason: "env lookup, numeric parse, header value and SSE retry field fall back to defaults",
    },
    Budget {
        pattern: "println!",
        max: 0,
        scope: Scope::Library,
        reason: "the library reports through tracing and the notification sink",
    },
    Budget {
        pattern: "send_replace",
        max: 1,
        scope: Scope::Library,
        reason: "only the poller republishes unconditionally; the runtime uses send_if_modified",
    },
    Budget {
        pattern: "unbounded_channel",
        max: 2,
        scope: Scope::Library,
        reason: "handle commands (sent from Drop) and ChannelSink; transport outcomes stay bounded",
    },
    Budget {
        pattern: "tokio::spawn",
        max: 4,
        scope: Scope::Library,
        reason: "event loop, stream reader, pre-flight and poller tasks",
    },
    Budget { pattern: "#[allow(dead_code)]", max: 0, scope: Scope::Library, reason: "delete unused code" },
];

struct SourceFile {
    path: String,
    content: String,
}

fn roots(scope: Scope) -> &'static [&'static str] {
    match scope {
        Scope::Library => &["src", "wire/src"],
        Scope::Workspace => &["src", "wire/src", "cli/src"],
    }
}

/// Non-test `.rs` files under the scope's roots.
fn source_files(scope: Scope) -> Vec<SourceFile> {
    let base = Path::new(env!("CARGO_MANIFEST_DIR"));
    let mut pending: Vec<PathBuf> = roots(scope).iter().map(|dir| base.join(dir)).collect();
    let mut files = Vec::new();

    while let Some(dir) = pending.pop() {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for path in entries.flatten().map(|entry| entry.path()) {
            if path.is_dir() {
                pending.push(path);
                continue;
            }
            let name = path.to_string_lossy().into_owned();
            if !name.ends_with(".rs") || name.ends_with("_test.rs") {
                continue;
            }
            if let Ok(content) = fs::read_to_string(&path) {
                files.push(SourceFile { path: name, content });
            }
        }
    }
    files
}

/// Matching lines per file, skipping comment lines.
fn hits(files: &[SourceFile], pattern: &str) -> Vec<(String, usize)> {
    files
        .iter()
        .filter_map(|file| {
            let count = file
                .content
                .lines()
                .filter(|line| !line.trim_start().starts_with("//"))
                .filter(|line| line.contains(pattern))
                .count();
            (count > 0).then(|| (file.path.clone(), count))
        })
        .collect()
}

#[test]
fn scan_covers_every_crate() {
    let files = source_files(Scope::Workspace);
    for expected in ["src/runtime.rs", "wire/src/lib.rs", "cli/src/main.rs"] {
        assert!(
            files.iter().any(|f| f.path.ends_with(expected)),
            "hygiene scan missed {expected}"
        );
    }
    assert!(files.iter().all(|f| !f.path.ends_with("_test.rs")));
}

#[test]
fn sources_stay_within_budget() {
    let library = source_files(Scope::Library);
    let workspace = source_files(Scope::Workspace);

    let mut failures = Vec::new();
    for budget in BUDGETS {
        let files = match budget.scope {
            Scope::Library => &library,
            Scope::Workspace => &workspace,
        };
        let found = hits(files, budget.pattern);
        let count: usize = found.iter().map(|(_, n)| n).sum();
        if count > budget.max {
            let detail: Vec<String> = found.iter().map(|(path, n)| format!("    {path}: {n}")).collect();
            failures.push(format!(
                "`{}`: found {count}, max {} ({})\n{}",
                budget.pattern,
                budget.max,
                budget.reason,
                detail.join("\n")
            ));
        }
    }
    assert!(failures.is_empty(), "budgets exceeded:\n{}", failures.join("\n"));
}

#[test]
fn transport_outcomes_use_bounded_channel() {
    let library = source_files(Scope::Library);
    let offenders = hits(&library, "UnboundedSender<Inbound>");
    assert!(offenders.is_empty(), "inbound channel must be bounded: {offenders:?}");
}
