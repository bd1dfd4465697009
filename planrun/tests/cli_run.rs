//! CLI tests for `planrun run`.
//!
//! Spawns the planrun binary against plan files in a temp directory and checks
//! exit codes, written results, and login sessions run with `--command`.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use planrun::core::types::ResultKind;
use planrun::exit_codes;
use planrun::io::results::load_results;
use planrun::test_support::{temp_plan, write_plan};

const PASSING: &str = r#"
[[tests]]
name = "/tests/one"
command = "true"

[[tests]]
name = "/tests/two"
command = "echo '::info:: fine'"
"#;

const FAILING: &str = r#"
[[tests]]
name = "/tests/ok"
command = "true"

[[tests]]
name = "/tests/broken"
command = "exit 1"
"#;

fn planrun(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_planrun"))
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .args(args)
        .output()
        .expect("planrun run")
}

#[test]
fn passing_plan_exits_ok_and_writes_results() {
    let (temp, plan) = temp_plan("smoke", PASSING);
    let plan = plan.display().to_string();

    let output = planrun(temp.path(), &["run", "--plan", &plan]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("name=smoke"), "{stdout}");

    let results = load_results(&temp.path().join(".planrun/smoke/results.json")).expect("results");
    assert_eq!(results.results.len(), 2);
    assert_eq!(results.overall, Some(ResultKind::Pass));
}

#[test]
fn failing_test_exits_failed() {
    let (temp, plan) = temp_plan("broken", FAILING);
    let plan = plan.display().to_string();

    let output = planrun(temp.path(), &["run", "--plan", &plan]);
    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
}

#[test]
fn worst_plan_decides_exit_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    let good = write_plan(temp.path(), "good", PASSING).display().to_string();
    let bad = write_plan(temp.path(), "bad", FAILING).display().to_string();

    let output = planrun(
        temp.path(),
        &["run", "--plan", &good, "--plan", &bad, "--jobs", "2"],
    );
    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("name=good"));
    assert!(stdout.contains("name=bad"));
}

#[test]
fn plans_sharing_an_output_directory_are_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    for dir in ["a", "b"] {
        fs::create_dir(temp.path().join(dir)).expect("mkdir");
    }
    let first = write_plan(&temp.path().join("a"), "smoke", FAILING).display().to_string();
    let second = write_plan(&temp.path().join("b"), "smoke", PASSING).display().to_string();

    let output = planrun(temp.path(), &["run", "--plan", &first, "--plan", &second]);
    assert_eq!(output.status.code(), Some(exit_codes::ERROR));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("both write to"), "{stderr}");
    assert!(!temp.path().join(".planrun/smoke").exists());
}

#[test]
fn login_at_guestless_phase_is_an_error() {
    let (temp, plan) = temp_plan("smoke", PASSING);
    let plan = plan.display().to_string();

    let output = planrun(
        temp.path(),
        &["run", "--plan", &plan, "login", "--step", "discover"],
    );
    assert_eq!(output.status.code(), Some(exit_codes::ERROR));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("No guests ready for login"), "{stderr}");
    assert!(!temp.path().join(".planrun/smoke/results.json").exists());
}

#[test]
fn login_at_provision_is_an_error() {
    let (temp, plan) = temp_plan("smoke", PASSING);
    let plan = plan.display().to_string();

    let output = planrun(
        temp.path(),
        &["run", "--plan", &plan, "login", "--step", "provision"],
    );
    assert_eq!(output.status.code(), Some(exit_codes::ERROR));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("No guests ready for login"), "{stderr}");
}

#[test]
fn per_test_login_runs_command_for_matching_tests() {
    let (temp, plan) = temp_plan("broken", FAILING);
    let plan = plan.display().to_string();

    let output = planrun(
        temp.path(),
        &[
            "run",
            "--plan",
            &plan,
            "login",
            "-t",
            "--when",
            "fail",
            "--command",
            "echo \"$PLANRUN_TEST $PLANRUN_TEST_RESULT\" >> \"$PLANRUN_WORKDIR/logins.txt\"",
        ],
    );
    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    let logins =
        fs::read_to_string(temp.path().join(".planrun/broken/logins.txt")).expect("logins");
    assert_eq!(logins, "/tests/broken fail\n");
}

#[test]
fn failing_login_command_exits_error() {
    let (temp, plan) = temp_plan("smoke", PASSING);
    let plan = plan.display().to_string();

    let output = planrun(
        temp.path(),
        &["run", "--plan", &plan, "login", "--command", "exit 5"],
    );
    assert_eq!(output.status.code(), Some(exit_codes::ERROR));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("exited with code 5"), "{stderr}");
    assert!(temp.path().join(".planrun/smoke/results.json").exists());
}

#[test]
fn unknown_result_name_is_rejected() {
    let (temp, plan) = temp_plan("smoke", PASSING);
    let plan = plan.display().to_string();

    let output = planrun(
        temp.path(),
        &["run", "--plan", &plan, "login", "--when", "flaky"],
    );
    assert_eq!(output.status.code(), Some(exit_codes::ERROR));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("flaky"), "{stderr}");
}

#[test]
fn phases_lists_guest_availability() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = planrun(temp.path(), &["phases"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("discover\tguestless\n"), "{stdout}");
    assert!(stdout.contains("execute\tguest\n"));
}
