use assert_cmd::Command;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn guidekit(project: &Path, cache: &Path) -> Command {
    let mut cmd = Command::cargo_bin("guidekit").unwrap();
    cmd.arg("--project")
        .arg(project)
        .env("GUIDEKIT_CACHE_DIR", cache)
        .env_remove("GUIDEKIT_REPO")
        .env_remove("RUST_LOG");
    cmd
}

fn stdout_of(cmd: &mut Command) -> String {
    let output = cmd.assert().success().get_output().stdout.clone();
    String::from_utf8_lossy(&output).to_string()
}

fn stderr_of_failure(cmd: &mut Command) -> String {
    let output = cmd.assert().failure().get_output().stderr.clone();
    String::from_utf8_lossy(&output).to_string()
}

const GO_INSTALLED: &str = r#"installedVersion = "v1.6.0"

[[installedComponents]]
type = "language"
name = "go"
"#;

#[test]
fn test_execute_list_shows_catalog() {
    let project = tempdir().unwrap();
    let cache = tempdir().unwrap();
    let output = stdout_of(guidekit(project.path(), cache.path()).arg("list"));
    assert!(output.contains("language"));
    assert!(output.contains("framework"));
    assert!(output.contains(".claude/language-guides/go.md"));
    assert!(output.contains("code-review"));
}

#[test]
fn test_execute_list_one_kind_with_installed_marker() {
    let project = tempdir().unwrap();
    let cache = tempdir().unwrap();
    fs::write(project.path().join(".guidekit.toml"), GO_INSTALLED).unwrap();

    let output = stdout_of(guidekit(project.path(), cache.path()).args(["list", "lang"]));
    let go_line = output.lines().find(|l| l.trim_start().starts_with("go ")).unwrap();
    assert!(go_line.contains("installed"));
    assert!(!output.contains("react"));
    assert!(output.contains("Installed version: v1.6.0"));
}

#[test]
fn test_execute_list_unknown_kind_fails() {
    let project = tempdir().unwrap();
    let cache = tempdir().unwrap();
    let stderr = stderr_of_failure(guidekit(project.path(), cache.path()).args(["list", "plugin"]));
    assert!(stderr.contains("unknown component type 'plugin'"));
}

#[cfg(test)]
mod cli_integration_tests {
    use std::fs;
    use tempfile::tempdir;
    use crate::{GO_INSTALLED, guidekit, stderr_of_failure, stdout_of};

    #[test]
    fn test_execute_remove_not_installed() {
        let project = tempdir().unwrap();
        let cache = tempdir().unwrap();
        fs::write(project.path().join(".guidekit.toml"), GO_INSTALLED).unwrap();
        let python = project.path().join(".claude/language-guides/python.md");
        fs::create_dir_all(python.parent().unwrap()).unwrap();
        fs::write(&python, "mine").unwrap();

        let stderr = stderr_of_failure(
            guidekit(project.path(), cache.path()).args(["remove", "language", "python"]),
        );
        assert!(stderr.contains("not installed"));
        assert_eq!(fs::read_to_string(&python).unwrap(), "mine");
        assert_eq!(
            fs::read_to_string(project.path().join(".guidekit.toml")).unwrap(),
            GO_INSTALLED
        );
    }

    #[test]
    fn test_execute_remove_unknown_component() {
        let project = tempdir().unwrap();
        let cache = tempdir().unwrap();
        let stderr = stderr_of_failure(
            guidekit(project.path(), cache.path()).args(["remove", "lang", "cobol"]),
        );
        assert!(stderr.contains("unknown language 'cobol'"));
    }

    #[test]
    fn test_execute_remove_installed_component() {
        let project = tempdir().unwrap();
        let cache = tempdir().unwrap();
        fs::write(project.path().join(".guidekit.toml"), GO_INSTALLED).unwrap();
        let go = project.path().join(".claude/language-guides/go.md");
        fs::create_dir_all(go.parent().unwrap()).unwrap();
        fs::write(&go, "# Go").unwrap();

        let output = stdout_of(guidekit(project.path(), cache.path()).args(["remove", "lang", "go"]));
        assert!(output.contains("removed"));
        assert!(!go.exists());
        let config = fs::read_to_string(project.path().join(".guidekit.toml")).unwrap();
        assert!(!config.contains("\"go\""));
        assert!(config.contains("installedVersion = \"v1.6.0\""));
    }

    #[test]
    fn test_execute_remove_several_names_is_all_or_nothing() {
        let project = tempdir().unwrap();
        let cache = tempdir().unwrap();
        fs::write(project.path().join(".guidekit.toml"), GO_INSTALLED).unwrap();
        let go = project.path().join(".claude/language-guides/go.md");
        fs::create_dir_all(go.parent().unwrap()).unwrap();
        fs::write(&go, "# Go").unwrap();

        let stderr = stderr_of_failure(
            guidekit(project.path(), cache.path()).args(["remove", "lang", "go", "python"]),
        );
        assert!(stderr.contains("language 'python' is not installed"));
        assert_eq!(fs::read_to_string(&go).unwrap(), "# Go");
        assert_eq!(
            fs::read_to_string(project.path().join(".guidekit.toml")).unwrap(),
            GO_INSTALLED
        );
    }

    #[test]
    fn test_execute_update_without_config_fails() {
        let project = tempdir().unwrap();
        let cache = tempdir().unwrap();
        let stderr = stderr_of_failure(guidekit(project.path(), cache.path()).arg("update"));
        assert!(stderr.contains("run `guidekit init` first"));
        assert!(!project.path().join(".guidekit.toml").exists());
    }

    #[test]
    fn test_execute_doctor() {
        let project = tempdir().unwrap();
        let cache = tempdir().unwrap();
        let output = stdout_of(guidekit(project.path(), cache.path()).arg("doctor"));
        assert!(output.contains("No problems found"));

        fs::write(project.path().join(".guidekit.toml"), GO_INSTALLED).unwrap();
        let output = guidekit(project.path(), cache.path())
            .arg("doctor")
            .assert()
            .failure()
            .get_output()
            .stdout
            .clone();
        let output = String::from_utf8_lossy(&output);
        assert!(output.contains("language:go is recorded as installed but .claude/language-guides/go.md is missing"));
    }

    #[test]
    fn test_execute_restore() {
        let project = tempdir().unwrap();
        let cache = tempdir().unwrap();
        let stderr = stderr_of_failure(
            guidekit(project.path(), cache.path()).args(["restore", "CLAUDE.md"]),
        );
        assert!(stderr.contains("no backup found"));

        fs::write(project.path().join("CLAUDE.md"), "upstream").unwrap();
        fs::write(project.path().join("CLAUDE.md.guidekit-backup"), "mine").unwrap();
        stdout_of(guidekit(project.path(), cache.path()).args(["restore", "CLAUDE.md"]));
        assert_eq!(fs::read_to_string(project.path().join("CLAUDE.md")).unwrap(), "mine");
        assert!(!project.path().join("CLAUDE.md.guidekit-backup").exists());
    }

    #[test]
    fn test_execute_cache_commands() {
        let project = tempdir().unwrap();
        let cache = tempdir().unwrap();
        let output = stdout_of(guidekit(project.path(), cache.path()).args(["cache", "list"]));
        assert!(output.contains("Cache is empty"));

        let entry = cache.path().join("v1.6.0");
        fs::create_dir_all(entry.join("tree")).unwrap();
        fs::write(
            entry.join("entry.toml"),
            "label = \"v1.6.0\"\nkind = \"tag\"\nfetchedAt = 0\n",
        )
        .unwrap();
        let output = stdout_of(guidekit(project.path(), cache.path()).args(["cache", "list"]));
        assert!(output.contains("v1.6.0"));
        assert!(output.contains("tag"));

        stdout_of(guidekit(project.path(), cache.path()).args(["cache", "clean", "v1.6.0"]));
        assert!(!entry.exists());
        let stderr = stderr_of_failure(
            guidekit(project.path(), cache.path()).args(["cache", "clean", "v1.6.0"]),
        );
        assert!(stderr.contains("no cached version 'v1.6.0'"));

        stdout_of(guidekit(project.path(), cache.path()).args(["cache", "clean"]));
        assert!(cache.path().exists());
    }

    #[test]
    fn test_execute_malformed_config_is_fatal() {
        let project = tempdir().unwrap();
        let cache = tempdir().unwrap();
        fs::write(project.path().join(".guidekit.toml"), "installedVersion = [oops").unwrap();
        let stderr = stderr_of_failure(guidekit(project.path(), cache.path()).arg("doctor"));
        assert!(stderr.contains("could not parse"));
        assert!(stderr.contains("run `guidekit init` again"));
    }
}
