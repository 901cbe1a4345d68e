//! CLI integration tests for conductor.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn conductor() -> Command {
    let mut cmd = cargo_bin_cmd!("conductor");
    cmd.env_remove("CONDUCTOR_AUTO_PILOT");
    cmd
}

fn create_task(dir: &TempDir, repos: &[&str]) -> String {
    let mut cmd = conductor();
    cmd.current_dir(dir.path())
        .args(["create", "--title", "Checkout", "--workspace", "."]);
    for repo in repos {
        cmd.args(["--repo", repo]);
    }
    let output = cmd.assert().success().get_output().stdout.clone();
    String::from_utf8(output).unwrap().trim().to_string()
}

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        conductor()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("approve"));
    }

    #[test]
    fn test_version() {
        conductor().arg("--version").assert().success();
    }

    #[test]
    fn test_unknown_command_fails() {
        conductor().arg("frobnicate").assert().failure();
    }
}

mod config_commands {
    use super::*;

    #[test]
    fn test_config_init_writes_file() {
        let dir = TempDir::new().unwrap();
        conductor()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created"));

        let content = fs::read_to_string(dir.path().join(".conductor/conductor.toml")).unwrap();
        assert!(content.contains("[pipeline]"));
        assert!(content.contains("max_retries = 3"));
    }

    #[test]
    fn test_config_show_without_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        conductor()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No conductor.toml found"))
            .stdout(predicate::str::contains("max_recovery_hops = 8"));
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".conductor")).unwrap();
        fs::write(
            dir.path().join(".conductor/conductor.toml"),
            "[contract_fixer]\nmax_retries = 0\n",
        )
        .unwrap();

        conductor()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("max_retries"));
    }

    #[test]
    fn test_config_validate_rejects_bad_toml() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".conductor")).unwrap();
        fs::write(dir.path().join(".conductor/conductor.toml"), "[pipeline\n").unwrap();

        conductor()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to parse conductor.toml"));
    }
}

mod task_commands {
    use super::*;

    #[test]
    fn test_create_then_status() {
        let dir = TempDir::new().unwrap();
        let id = create_task(&dir, &["web:frontend", "api:backend:services/api"]);
        assert!(!id.is_empty());
        assert!(dir.path().join(".conductor/tasks.db").exists());

        conductor()
            .current_dir(dir.path())
            .args(["status", &id])
            .assert()
            .success()
            .stdout(predicate::str::contains("Checkout"))
            .stdout(predicate::str::contains("pending"))
            .stdout(predicate::str::contains("services/api"));

        conductor()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains(id.as_str()));
    }

    #[test]
    fn test_create_rejects_bad_repository_kind() {
        let dir = TempDir::new().unwrap();
        conductor()
            .current_dir(dir.path())
            .args(["create", "--title", "x", "--workspace", ".", "--repo", "db:database"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("repository kind"));
    }

    #[test]
    fn test_status_of_missing_task_fails() {
        let dir = TempDir::new().unwrap();
        conductor()
            .current_dir(dir.path())
            .args(["status", "nope"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("not found"));
    }

    #[test]
    fn test_cancel_marks_task() {
        let dir = TempDir::new().unwrap();
        let id = create_task(&dir, &["web:frontend"]);

        conductor()
            .current_dir(dir.path())
            .args(["cancel", &id])
            .assert()
            .success();
        conductor()
            .current_dir(dir.path())
            .args(["status", &id])
            .assert()
            .success()
            .stdout(predicate::str::contains("cancellation requested"));

        conductor()
            .current_dir(dir.path())
            .args(["cancel", &id, "--clear"])
            .assert()
            .success();
        conductor()
            .current_dir(dir.path())
            .args(["status", &id])
            .assert()
            .success()
            .stdout(predicate::str::contains("cancellation requested").not());
    }

    #[test]
    fn test_directive_rejects_unknown_priority() {
        let dir = TempDir::new().unwrap();
        let id = create_task(&dir, &["web:frontend"]);

        conductor()
            .current_dir(dir.path())
            .args(["directive", &id, "use v2", "--priority", "urgent"])
            .assert()
            .failure();
        conductor()
            .current_dir(dir.path())
            .args(["directive", &id, "use v2", "--priority", "high"])
            .assert()
            .success();
        conductor()
            .current_dir(dir.path())
            .args(["status", &id])
            .assert()
            .success()
            .stdout(predicate::str::contains("Directives: 1"));
    }

    #[test]
    fn test_approve_unknown_agent_path_fails() {
        let dir = TempDir::new().unwrap();
        let id = create_task(&dir, &["web:frontend"]);
        conductor()
            .current_dir(dir.path())
            .args(["approve", &id])
            .assert()
            .failure()
            .stderr(predicate::str::contains("e2e-testing"));
    }
}

mod run_command {
    use super::*;

    /// With a single repository there is nothing for an agent to do, so the
    /// pipeline runs to the approval gate without spawning one.
    #[test]
    fn test_run_suspends_then_approve_and_resume() {
        let dir = TempDir::new().unwrap();
        let id = create_task(&dir, &["web:frontend"]);

        conductor()
            .current_dir(dir.path())
            .args(["run", &id])
            .assert()
            .success()
            .stdout(predicate::str::contains("waiting for approval"));

        conductor()
            .current_dir(dir.path())
            .args(["approve", &id, "--actor", "alice"])
            .assert()
            .success();

        conductor()
            .current_dir(dir.path())
            .args(["run", &id])
            .assert()
            .success()
            .stdout(predicate::str::contains("pipeline completed"));

        conductor()
            .current_dir(dir.path())
            .args(["status", &id])
            .assert()
            .success()
            .stdout(predicate::str::contains("completed"))
            .stdout(predicate::str::contains("skipped on recovery"));
    }

    #[test]
    fn test_run_auto_pilot_completes() {
        let dir = TempDir::new().unwrap();
        let id = create_task(&dir, &["web:frontend"]);
        conductor()
            .current_dir(dir.path())
            .args(["run", &id, "--auto-pilot"])
            .assert()
            .success()
            .stdout(predicate::str::contains("pipeline completed"));
    }

    #[test]
    fn test_run_rejects_malformed_merge_conflict() {
        let dir = TempDir::new().unwrap();
        let id = create_task(&dir, &["web:frontend"]);
        let conflict = dir.path().join("conflict.json");
        fs::write(&conflict, "{\"storyTitle\": \"missing ids\"}").unwrap();

        conductor()
            .current_dir(dir.path())
            .args(["run", &id, "--merge-conflict"])
            .arg(&conflict)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid merge conflict description"));
    }

    #[test]
    fn test_run_cancelled_task() {
        let dir = TempDir::new().unwrap();
        let id = create_task(&dir, &["web:frontend"]);
        conductor()
            .current_dir(dir.path())
            .args(["cancel", &id])
            .assert()
            .success();
        conductor()
            .current_dir(dir.path())
            .args(["run", &id])
            .assert()
            .success()
            .stdout(predicate::str::contains("cancelled during conflict-resolver"));
    }
}
