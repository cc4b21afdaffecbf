use std::error::Error;
use std::fs;
use std::path::Path;
use std::process::Command;

use fundwatch_core::GitContext;
use tempfile::tempdir;

#[test]
fn committed_file_follows_the_latest_commit() -> Result<(), Box<dyn Error>> {
    let temp = tempdir()?;
    let workspace = temp.path();

    fs::create_dir_all(workspace.join("src/data"))?;
    let tracked = workspace.join("src/data/congressData.json");
    fs::write(&tracked, "{\"version\":1}\n")?;

    init_git_repo(workspace)?;
    commit_all(workspace, "initial commit")?;

    fs::write(&tracked, "{\"version\":2}\n")?;
    commit_all(workspace, "second commit")?;

    let context = GitContext::open(workspace).ok_or("expected git context")?;
    let committed = context
        .committed_file(Path::new("src/data/congressData.json"))
        .ok_or("expected committed blob")?;
    assert_eq!(committed, b"{\"version\":2}\n");
    Ok(())
}

#[test]
fn non_git_workspace_returns_none() -> Result<(), Box<dyn Error>> {
    let temp = tempdir()?;
    assert!(GitContext::open(temp.path()).is_none());
    Ok(())
}

#[test]
fn committed_file_reads_head_version_not_worktree() -> Result<(), Box<dyn Error>> {
    let temp = tempdir()?;
    let workspace = temp.path();

    fs::create_dir_all(workspace.join("src/data"))?;
    let tracked = workspace.join("src/data/congressData.json");
    fs::write(&tracked, "{\"version\":1}\n")?;

    init_git_repo(workspace)?;
    commit_all(workspace, "initial")?;

    fs::write(&tracked, "{\"version\":2}\n")?;

    let context = GitContext::open(workspace).ok_or("expected git context")?;

    let relative = context
        .committed_file(Path::new("src/data/congressData.json"))
        .ok_or("expected committed blob")?;
    assert_eq!(relative, b"{\"version\":1}\n");

    let absolute = context
        .committed_file(&tracked)
        .ok_or("expected committed blob by absolute path")?;
    assert_eq!(absolute, relative);

    assert!(context.committed_file(Path::new("src/data/missing.json")).is_none());
    Ok(())
}

#[test]
fn committed_file_is_none_before_first_commit() -> Result<(), Box<dyn Error>> {
    let temp = tempdir()?;
    let workspace = temp.path();
    init_git_repo(workspace)?;
    fs::write(workspace.join("data.json"), "{}\n")?;

    let context = GitContext::open(workspace).ok_or("expected git context")?;
    assert!(context.committed_file(Path::new("data.json")).is_none());
    Ok(())
}

fn run_git(workspace: &Path, args: &[&str]) -> Result<String, Box<dyn Error>> {
    let output = Command::new("git")
        .args(args)
        .current_dir(workspace)
        .output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!("git {:?} failed: {}", args, stderr.trim()).into());
    }

    Ok(String::from_utf8(output.stdout)?.trim().to_owned())
}

fn init_git_repo(workspace: &Path) -> Result<(), Box<dyn Error>> {
    run_git(workspace, &["init"])?;
    run_git(workspace, &["config", "user.name", "Fundwatch Test"])?;
    run_git(
        workspace,
        &["config", "user.email", "fundwatch-test@example.com"],
    )?;
    Ok(())
}

fn commit_all(workspace: &Path, message: &str) -> Result<(), Box<dyn Error>> {
    run_git(workspace, &["add", "."])?;
    run_git(workspace, &["commit", "-m", message])?;
    Ok(())
}
