use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

const DATASHEET_TEXT: &str = "TI\nTPS54331 3-A, 28-V Input, Step-Down Converter\n\
    Electrical Characteristics\nThe device is a synchronous buck regulator.\n";

fn docsort_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("docsort");
    path
}

/// Minimal valid PDF with one blank page (no content stream).
/// Builds body then xref with correct byte offsets.
fn blank_pdf() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(
        b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Resources << >> >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 4\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o1).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o2).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o3).as_bytes());
    out.extend_from_slice(b"trailer << /Size 4 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

struct Env {
    _tmp: TempDir,
    root: PathBuf,
    config_path: PathBuf,
}

impl Env {
    fn staging(&self) -> PathBuf {
        self.root.join("staging")
    }

    fn archive(&self) -> PathBuf {
        self.root.join("archive")
    }

    fn stage(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let p = self.staging().join(name);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(&p, bytes).unwrap();
        p
    }

    fn metadata_lines(&self) -> Vec<String> {
        fs::read_to_string(self.archive().join("metadata.jsonl"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn archived_files(&self) -> usize {
        count_files(&self.archive())
    }
}

fn count_files(dir: &Path) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    let mut n = 0;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || name == "metadata.jsonl" {
            continue;
        }
        let path = entry.path();
        if path.is_dir() {
            n += count_files(&path);
        } else {
            n += 1;
        }
    }
    n
}

fn setup_with(extra: &str) -> Env {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[paths]
staging = "{root}/staging"
archive = "{root}/archive"

[watch]
stable_secs = 0
scan_interval_secs = 1
include_globs = ["**/*.pdf", "**/*.txt"]
{extra}
"#,
        root = root.display(),
        extra = extra
    );

    let config_path = config_dir.join("docsort.toml");
    fs::write(&config_path, config_content).unwrap();

    Env {
        _tmp: tmp,
        root,
        config_path,
    }
}

fn setup() -> Env {
    setup_with("")
}

fn run_docsort(env: &Env, args: &[&str]) -> (String, String, bool) {
    let binary = docsort_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(env.config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run docsort binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn init(env: &Env) {
    let (stdout, stderr, success) = run_docsort(env, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
}

#[test]
fn test_init_creates_layout() {
    let env = setup();
    let (stdout, _, success) = run_docsort(&env, &["init"]);
    assert!(success);
    assert!(stdout.contains("Initialized"));
    assert!(env.staging().is_dir());
    assert!(env.archive().is_dir());
    assert!(env.archive().join(".docsort/ledger.sqlite").is_file());
}

#[test]
fn test_init_idempotent() {
    let env = setup();
    let (_, _, success1) = run_docsort(&env, &["init"]);
    assert!(success1, "First init failed");
    let (_, _, success2) = run_docsort(&env, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_run_once_classifies_datasheet() {
    let env = setup();
    init(&env);
    let staged = env.stage("downloads/tps54331.txt", DATASHEET_TEXT.as_bytes());

    let (stdout, stderr, success) = run_docsort(&env, &["run", "--once"]);
    assert!(success, "run failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("classified: 1"), "stdout={}", stdout);
    assert!(stdout.contains("ok"));

    assert!(!staged.exists());
    assert!(env
        .archive()
        .join("TI/datasheet/power_ic/buck/tps54331.txt")
        .is_file());

    let lines = env.metadata_lines();
    assert_eq!(lines.len(), 1);
    let record: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
    assert_eq!(record["status"], "classified");
    assert_eq!(record["vendor"], "TI");
    assert_eq!(record["topology"], "buck");
    assert!(record["aggregate_confidence"].as_f64().unwrap() >= 0.6);
    assert!(record["classification"]["topology"]["evidence"]
        .as_array()
        .unwrap()
        .iter()
        .any(|e| e == "buck"));
}

#[test]
fn test_unreadable_documents_go_to_error_bucket() {
    let env = setup();
    init(&env);
    env.stage("blank.pdf", &blank_pdf());
    env.stage("html.pdf", b"<html><body>Access denied</body></html>");

    let (stdout, stderr, success) = run_docsort(&env, &["run", "--once"]);
    assert!(success, "run failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("extraction errors: 2"), "stdout={}", stdout);

    let errors = env.archive().join("Unknown/ErrorFiles");
    assert!(errors.join("blank.pdf").is_file());
    assert!(errors.join("html.pdf").is_file());

    for line in env.metadata_lines() {
        let record: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(record["status"], "extraction_error");
        assert_eq!(record["vendor"], "unknown");
        assert_eq!(record["aggregate_confidence"], 0.0);
        assert_eq!(record["error_kind"], "extraction_failure");
        assert!(record["error_reason"].is_string());
        if record["source_path"].as_str().unwrap().ends_with("html.pdf") {
            assert_eq!(record["error_reason"], "corrupt");
        }
    }
}

#[test]
fn test_rerun_is_idempotent_in_copy_mode() {
    let env = setup_with("\n[archive]\ntransfer = \"copy\"\n");
    init(&env);
    env.stage("a.txt", DATASHEET_TEXT.as_bytes());

    let (stdout, _, success) = run_docsort(&env, &["run", "--once"]);
    assert!(success);
    assert!(stdout.contains("classified: 1"));
    assert_eq!(env.archived_files(), 1);

    let (stdout, _, success) = run_docsort(&env, &["run", "--once"]);
    assert!(success);
    assert!(stdout.contains("classified: 0"), "stdout={}", stdout);
    assert_eq!(env.archived_files(), 1);
    assert_eq!(env.metadata_lines().len(), 1);
    assert!(env.staging().join("a.txt").exists());
}

#[test]
fn test_duplicate_content_is_moved_aside() {
    let env = setup();
    init(&env);
    env.stage("first.txt", DATASHEET_TEXT.as_bytes());
    let (_, _, success) = run_docsort(&env, &["run", "--once"]);
    assert!(success);

    env.stage("second.txt", DATASHEET_TEXT.as_bytes());
    let (stdout, _, success) = run_docsort(&env, &["run", "--once"]);
    assert!(success);
    assert!(stdout.contains("duplicates: 1"), "stdout={}", stdout);
    assert!(env.archive().join("Unknown/Duplicates/second.txt").is_file());

    // A duplicate record is not a second classification.
    let (stdout, _, success) = run_docsort(&env, &["audit"]);
    assert!(success, "audit should pass: {}", stdout);
}

#[test]
fn test_dry_run_moves_nothing() {
    let env = setup();
    init(&env);
    let staged = env.stage("a.txt", DATASHEET_TEXT.as_bytes());

    let (stdout, stderr, success) = run_docsort(&env, &["run", "--once", "--dry-run"]);
    assert!(success, "stderr={}", stderr);
    assert!(stdout.contains("planned (dry-run): 1"), "stdout={}", stdout);
    assert!(staged.exists());
    assert_eq!(env.archived_files(), 0);
    assert!(env.metadata_lines().is_empty());
}

#[test]
fn test_classify_prints_json_without_side_effects() {
    let env = setup();
    init(&env);
    let staged = env.stage("tps54331.txt", DATASHEET_TEXT.as_bytes());

    let (stdout, stderr, success) =
        run_docsort(&env, &["classify", staged.to_str().unwrap()]);
    assert!(success, "stderr={}", stderr);
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["status"], "classified");
    assert_eq!(report["classification"]["vendor"]["label"], "TI");
    assert!(report["destination"]
        .as_str()
        .unwrap()
        .ends_with("TI/datasheet/power_ic/buck/tps54331.txt"));
    assert!(staged.exists());
    assert_eq!(env.archived_files(), 0);
}

#[test]
fn test_ledger_list_and_show() {
    let env = setup();
    init(&env);
    env.stage("a.txt", DATASHEET_TEXT.as_bytes());
    run_docsort(&env, &["run", "--once"]);

    let (stdout, _, success) = run_docsort(&env, &["ledger", "list", "--json"]);
    assert!(success);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 1);
    let entry: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(entry["status"], "completed");
    assert_eq!(entry["outcome"], "classified");
    let fingerprint = entry["fingerprint"].as_str().unwrap().to_string();

    let (stdout, _, success) = run_docsort(
        &env,
        &["ledger", "list", "--status", "completed", "--since", "2000-01-01"],
    );
    assert!(success);
    assert!(stdout.contains(&fingerprint[..12]));

    let (stdout, _, success) = run_docsort(&env, &["ledger", "list", "--since", "2999-01-01"]);
    assert!(success);
    assert!(stdout.contains("No ledger entries"));

    let (stdout, stderr, success) = run_docsort(&env, &["ledger", "show", &fingerprint[..10]]);
    assert!(success, "stderr={}", stderr);
    assert!(stdout.contains(&fingerprint));
    assert!(stdout.contains("Records (1)"));
    assert!(stdout.contains("TI / datasheet / power_ic / buck"));
}

#[test]
fn test_ledger_list_rejects_unknown_status() {
    let env = setup();
    init(&env);
    let (_, stderr, success) = run_docsort(&env, &["ledger", "list", "--status", "done"]);
    assert!(!success);
    assert!(stderr.contains("unknown status"));
}

#[test]
fn test_ledger_show_missing() {
    let env = setup();
    init(&env);
    let (_, stderr, success) = run_docsort(&env, &["ledger", "show", "deadbeef"]);
    assert!(!success);
    assert!(stderr.contains("no ledger entry"));
}

#[test]
fn test_stats() {
    let env = setup();
    init(&env);
    env.stage("a.txt", DATASHEET_TEXT.as_bytes());
    run_docsort(&env, &["run", "--once"]);

    let (stdout, stderr, success) = run_docsort(&env, &["stats"]);
    assert!(success, "stderr={}", stderr);
    assert!(stdout.contains("Files:       1"));
    assert!(stdout.contains("completed"));
    assert!(stdout.contains("TI"));
}

#[test]
fn test_audit_flags_duplicate_classification() {
    let env = setup();
    init(&env);
    env.stage("a.txt", DATASHEET_TEXT.as_bytes());
    run_docsort(&env, &["run", "--once"]);

    let (stdout, _, success) = run_docsort(&env, &["audit"]);
    assert!(success, "clean log should pass: {}", stdout);

    // Simulate the crash-recovery anomaly: a second primary record.
    let log = env.archive().join("metadata.jsonl");
    let line = env.metadata_lines().remove(0);
    let mut content = fs::read_to_string(&log).unwrap();
    content.push_str(&line);
    content.push('\n');
    fs::write(&log, content).unwrap();

    let (stdout, _, success) = run_docsort(&env, &["audit"]);
    assert!(!success);
    assert!(stdout.contains("duplicate classifications: 1"), "stdout={}", stdout);
}

#[test]
fn test_check_before_and_after_init() {
    let env = setup();
    let (stdout, _, success) = run_docsort(&env, &["check"]);
    assert!(!success);
    assert!(stdout.contains("MISSING"));

    init(&env);
    let (stdout, _, success) = run_docsort(&env, &["check"]);
    assert!(success, "stdout={}", stdout);
    assert!(stdout.contains("built-in"));
}

#[test]
fn test_invalid_config_is_fatal_before_touching_files() {
    let env = setup_with("\n[classifier]\nlow_confidence_threshold = 2.0\n");
    fs::create_dir_all(env.archive()).unwrap();
    let staged = env.stage("a.txt", DATASHEET_TEXT.as_bytes());

    let (_, stderr, success) = run_docsort(&env, &["run", "--once"]);
    assert!(!success);
    assert!(stderr.contains("low_confidence_threshold"));
    assert!(staged.exists());
}

#[test]
fn test_missing_archive_root_is_fatal() {
    let env = setup();
    let staged = env.stage("a.txt", DATASHEET_TEXT.as_bytes());

    let (_, stderr, success) = run_docsort(&env, &["run", "--once"]);
    assert!(!success);
    assert!(stderr.contains("Archive root does not exist"));
    assert!(staged.exists());
}

#[test]
fn test_invalid_lexicon_is_fatal() {
    let env = setup();
    init(&env);
    let lexicon = env.root.join("config/lexicon.toml");
    fs::write(&lexicon, "version = \"x\"\n[[vendor]]\nlabel = \"unknown\"\nkeywords = [\"a\"]\n").unwrap();
    let mut config = fs::read_to_string(&env.config_path).unwrap();
    config = config.replace(
        "[paths]\n",
        &format!("[paths]\nlexicon = \"{}\"\n", lexicon.display()),
    );
    fs::write(&env.config_path, config).unwrap();
    let staged = env.stage("a.txt", DATASHEET_TEXT.as_bytes());

    let (_, stderr, success) = run_docsort(&env, &["run", "--once"]);
    assert!(!success);
    assert!(stderr.contains("lexicon"), "stderr={}", stderr);
    assert!(staged.exists());
}
