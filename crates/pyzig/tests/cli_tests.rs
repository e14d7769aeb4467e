use assert_cmd::Command;
use predicates::prelude::*;

fn pyzig() -> Command {
    Command::cargo_bin("pyzig").expect("binary builds")
}

#[test]
fn test_help_lists_build_subcommand() {
    pyzig()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("build"))
        .stdout(predicate::str::contains("--show-ir"));
}

#[test]
fn test_missing_source_file_exits_one() {
    pyzig()
        .arg("does-not-exist.py")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("file not found"));
}

#[test]
fn test_no_arguments_exits_one() {
    pyzig()
        .assert()
        .code(1)
        .stderr(predicate::str::contains("missing source file"));
}

#[test]
fn test_build_with_no_python_files_exits_one() {
    let dir = tempfile::tempdir().unwrap();
    pyzig()
        .current_dir(dir.path())
        .args(["build", "."])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("No Python files found"));
}

#[test]
fn test_unsupported_source_reports_compile_error() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("bad.py");
    std::fs::write(&source, "with open(\"f\") as f:\n    pass\n").unwrap();

    pyzig()
        .arg(source.to_str().unwrap())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("not implemented: with statement"));
}
