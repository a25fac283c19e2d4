// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-commit script environments.
//!
//! An environment is a clone of a script repository plus an isolated
//! site-packages directory, keyed by a hash of repo URL and commit. At most
//! one caller builds a given environment; concurrent callers block on the
//! builder's result. Build completion is also recorded as a marker file
//! (`.created` / `.failed`) so worker processes can observe it.

use crate::env;
use oet_core::ExecutableScript;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Marker written when a build completes.
pub const CREATED_MARKER: &str = ".created";
/// Marker written when a build fails; contains the captured output.
pub const FAILED_MARKER: &str = ".failed";

#[derive(Debug, Clone, Error)]
pub enum EnvError {
    #[error("EnvironmentBuildFailed: {output}")]
    BuildFailed { output: String },

    #[error("EnvironmentTimeout: build not finished after {0:?}")]
    Timeout(Duration),

    #[error("EnvironmentBuildFailed: cannot resolve {reference} in {repo}: {message}")]
    Resolve { repo: String, reference: String, message: String },
}

/// A ready (or building) environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    pub env_id: String,
    pub env_dir: PathBuf,
    pub repo_dir: PathBuf,
    pub site_packages: PathBuf,
    pub commit: String,
}

type BuildResult = Option<Result<Environment, String>>;

enum Entry {
    Creating(watch::Receiver<BuildResult>),
    Ready { environment: Environment, installed: bool, ref_count: u32, seq: u64 },
}

/// Owns the environment table; all access is serialised per `env_id`.
pub struct EnvironmentManager {
    root: PathBuf,
    entries: Mutex<HashMap<String, Entry>>,
    wait_timeout: Duration,
    seq: AtomicU64,
}

/// Deterministic environment id for a repo at a commit.
pub fn env_id(repo: &str, commit: &str) -> String {
    format!("{:x}", Sha256::digest(format!("{}:{}", repo, commit).as_bytes()))
}

impl EnvironmentManager {
    pub fn new(root: PathBuf, wait_timeout: Duration) -> Self {
        Self { root, entries: Mutex::new(HashMap::new()), wait_timeout, seq: AtomicU64::new(0) }
    }

    pub fn from_env() -> Self {
        Self::new(env::state_dir().join("envs"), env::env_timeout())
    }

    /// Deterministic on-disk layout for `repo`@`commit`, whether or not the
    /// environment has been built yet. Workers receive these paths and
    /// observe readiness through the markers.
    pub fn layout(&self, repo: &str, commit: &str) -> Environment {
        let id = env_id(repo, commit);
        let env_dir = self.root.join(&id);
        Environment {
            env_id: id,
            repo_dir: env_dir.join("repo"),
            site_packages: env_dir.join("site_packages"),
            env_dir,
            commit: commit.to_string(),
        }
    }

    /// Resolve a git script to a concrete commit hash without cloning.
    pub async fn resolve_commit(&self, script: &ExecutableScript) -> Result<String, EnvError> {
        let ExecutableScript::Git { repo, branch, commit, .. } = script else {
            return Err(EnvError::Resolve {
                repo: String::new(),
                reference: String::new(),
                message: "not a git script".into(),
            });
        };
        if let Some(commit) = commit {
            return Ok(commit.clone());
        }
        let reference = branch.clone().unwrap_or_else(|| "HEAD".to_string());
        let mut cmd = Command::new("git");
        cmd.arg("ls-remote").arg(repo).arg(&reference);
        let output = run_captured(cmd).await.map_err(|message| EnvError::Resolve {
            repo: repo.clone(),
            reference: reference.clone(),
            message,
        })?;
        output
            .split_whitespace()
            .next()
            .map(|hash| hash.to_string())
            .filter(|hash| !hash.is_empty())
            .ok_or_else(|| EnvError::Resolve {
                repo: repo.clone(),
                reference,
                message: "no matching ref".into(),
            })
    }

    /// Ensure the environment for `repo`@`commit` exists.
    ///
    /// With `install` false only the clone is guaranteed (scripts loaded
    /// from git without a dedicated environment). Exactly one caller
    /// builds; everyone else blocks on the same outcome.
    pub async fn ensure(
        &self,
        repo: &str,
        commit: &str,
        install: bool,
    ) -> Result<Environment, EnvError> {
        let id = env_id(repo, commit);
        enum Plan {
            Use(Environment),
            Wait(watch::Receiver<BuildResult>),
            Build(watch::Sender<BuildResult>, u32),
        }
        let plan = {
            let mut entries = self.entries.lock();
            // references held against a clone-only entry carry over when it
            // is rebuilt with an install pass
            let prior_refs = match entries.get(&id) {
                Some(Entry::Ready { ref_count, .. }) => *ref_count,
                _ => 0,
            };
            match entries.get_mut(&id) {
                Some(Entry::Ready { environment, installed, ref_count, .. })
                    if *installed || !install =>
                {
                    *ref_count += 1;
                    Plan::Use(environment.clone())
                }
                Some(Entry::Creating(rx)) => Plan::Wait(rx.clone()),
                // absent, or cloned-only and now needing an install pass
                _ => {
                    let (tx, rx) = watch::channel(None);
                    entries.insert(id.clone(), Entry::Creating(rx));
                    Plan::Build(tx, prior_refs)
                }
            }
        };

        match plan {
            Plan::Use(environment) => Ok(environment),
            Plan::Wait(mut rx) => {
                debug!(env_id = %id, "blocking on concurrent environment build");
                let waited =
                    tokio::time::timeout(self.wait_timeout, rx.wait_for(|r| r.is_some())).await;
                let outcome = match waited {
                    Ok(Ok(value)) => value.clone(),
                    _ => return Err(EnvError::Timeout(self.wait_timeout)),
                };
                match outcome {
                    Some(Ok(environment)) => {
                        self.retain(&environment.env_id);
                        Ok(environment)
                    }
                    Some(Err(output)) => Err(EnvError::BuildFailed { output }),
                    None => Err(EnvError::Timeout(self.wait_timeout)),
                }
            }
            Plan::Build(tx, prior_refs) => {
                let result = self.build(&id, repo, commit, install).await;
                let mut entries = self.entries.lock();
                match &result {
                    Ok(environment) => {
                        entries.insert(
                            id.clone(),
                            Entry::Ready {
                                environment: environment.clone(),
                                installed: install,
                                ref_count: prior_refs + 1,
                                seq: self.seq.fetch_add(1, Ordering::Relaxed),
                            },
                        );
                        let _ = tx.send(Some(Ok(environment.clone())));
                    }
                    Err(e) => {
                        // clear the claim so a later caller may retry
                        entries.remove(&id);
                        let _ = tx.send(Some(Err(e.to_string())));
                    }
                }
                result
            }
        }
    }

    /// Drop one reference to an environment.
    pub fn release(&self, env_id: &str) {
        let mut entries = self.entries.lock();
        if let Some(Entry::Ready { ref_count, .. }) = entries.get_mut(env_id) {
            *ref_count = ref_count.saturating_sub(1);
        }
    }

    fn retain(&self, env_id: &str) {
        let mut entries = self.entries.lock();
        if let Some(Entry::Ready { ref_count, .. }) = entries.get_mut(env_id) {
            *ref_count += 1;
        }
    }

    /// Current reference count, for inspection.
    pub fn ref_count(&self, env_id: &str) -> u32 {
        match self.entries.lock().get(env_id) {
            Some(Entry::Ready { ref_count, .. }) => *ref_count,
            _ => 0,
        }
    }

    /// Remove the oldest zero-reference environments beyond `keep_n_inactive`.
    /// Returns how many were deleted.
    pub async fn prune(&self, keep_n_inactive: usize) -> usize {
        let victims: Vec<(String, PathBuf)> = {
            let entries = self.entries.lock();
            let mut inactive: Vec<(&String, u64, &Environment)> = entries
                .iter()
                .filter_map(|(id, entry)| match entry {
                    Entry::Ready { environment, ref_count: 0, seq, .. } => {
                        Some((id, *seq, environment))
                    }
                    _ => None,
                })
                .collect();
            inactive.sort_by_key(|(_, seq, _)| *seq);
            let excess = inactive.len().saturating_sub(keep_n_inactive);
            inactive
                .into_iter()
                .take(excess)
                .map(|(id, _, environment)| (id.clone(), environment.env_dir.clone()))
                .collect()
        };
        let mut removed = 0;
        for (id, dir) in victims {
            self.entries.lock().remove(&id);
            if tokio::fs::remove_dir_all(&dir).await.is_ok() {
                removed += 1;
            }
            info!(env_id = %id, "environment pruned");
        }
        removed
    }

    async fn build(
        &self,
        id: &str,
        repo: &str,
        commit: &str,
        install: bool,
    ) -> Result<Environment, EnvError> {
        let environment = self.layout(repo, commit);
        let (env_dir, repo_dir, site_packages) = (
            environment.env_dir.clone(),
            environment.repo_dir.clone(),
            environment.site_packages.clone(),
        );

        let outcome = async {
            tokio::fs::create_dir_all(&env_dir).await.map_err(|e| e.to_string())?;
            if !repo_dir.join(".git").exists() {
                let mut clone = Command::new("git");
                clone.arg("clone").arg(repo).arg(&repo_dir);
                run_captured(clone).await?;
            }
            let mut checkout = Command::new("git");
            checkout.arg("-C").arg(&repo_dir).arg("checkout").arg("--detach").arg(commit);
            run_captured(checkout).await?;
            if install {
                tokio::fs::create_dir_all(&site_packages).await.map_err(|e| e.to_string())?;
                install_dependencies(&repo_dir, &site_packages).await?;
                tokio::fs::write(env_dir.join(CREATED_MARKER), commit.as_bytes())
                    .await
                    .map_err(|e| e.to_string())?;
            }
            Ok::<(), String>(())
        }
        .await;

        match outcome {
            Ok(()) => {
                info!(env_id = %id, commit, install, "environment ready");
                Ok(environment)
            }
            Err(output) => {
                warn!(env_id = %id, output = %output, "environment build failed");
                let _ = tokio::fs::write(env_dir.join(FAILED_MARKER), output.as_bytes()).await;
                Err(EnvError::BuildFailed { output })
            }
        }
    }
}

/// Install project dependencies into the isolated site-packages tree.
/// Repositories without a recognised manifest install nothing.
async fn install_dependencies(repo_dir: &Path, site_packages: &Path) -> Result<(), String> {
    let runner = env::script_runner();
    if repo_dir.join("requirements.txt").exists() {
        let mut pip = Command::new(&runner);
        pip.arg("-m")
            .arg("pip")
            .arg("install")
            .arg("--target")
            .arg(site_packages)
            .arg("-r")
            .arg(repo_dir.join("requirements.txt"));
        run_captured(pip).await?;
    } else if repo_dir.join("pyproject.toml").exists() || repo_dir.join("setup.py").exists() {
        let mut pip = Command::new(&runner);
        pip.arg("-m").arg("pip").arg("install").arg("--target").arg(site_packages).arg(repo_dir);
        run_captured(pip).await?;
    }
    Ok(())
}

/// Run a command capturing output; failures return the combined output.
async fn run_captured(mut cmd: Command) -> Result<String, String> {
    let rendered = format!("{:?}", cmd.as_std());
    let output = cmd.output().await.map_err(|e| format!("{}: {}", rendered, e))?;
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if output.status.success() {
        Ok(stdout)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(format!("{} exited {:?}: {}{}", rendered, output.status.code(), stdout, stderr))
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
