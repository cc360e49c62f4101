//! Subprocess wrapper over the `git` binary.
//!
//! Every invocation gets an explicit working directory and environment.
//! Read commands pass `--` before any path argument so paths are never
//! parsed as revisions. Writes are plumbing-only; snapshot staging runs
//! against an isolated index selected with `GIT_INDEX_FILE`.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use super::error::GitError;

/// Default wall-clock limit for one git subprocess.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Git internal files indicating an operation in flight.
const BUSY_MARKERS: &[&str] = &[
    "rebase-merge",
    "rebase-apply",
    "MERGE_HEAD",
    "CHERRY_PICK_HEAD",
    "BISECT_LOG",
];

/// Hours before an `index.lock` is reported as stale rather than merely busy.
const STALE_LOCK_HOURS: u64 = 24;

/// A ref with its target and commit time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefInfo {
    pub name: String,
    pub oid: String,
    /// Committer time, unix seconds.
    pub committed_at: i64,
}

/// Parsed `git diff --shortstat` output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DiffStat {
    pub files_changed: u64,
    pub insertions: u64,
    pub deletions: u64,
}

/// Encode a branch name into a single ref path segment (`/` → `%2F`).
pub fn encode_branch(branch: &str) -> String {
    branch.replace('%', "%25").replace('/', "%2F")
}

/// Inverse of [`encode_branch`].
pub fn decode_branch(segment: &str) -> String {
    segment.replace("%2F", "/").replace("%25", "%")
}

/// Handle to one repository for subprocess git invocations.
#[derive(Clone, Debug)]
pub struct GitRepo {
    path: PathBuf,
    git_dir: PathBuf,
    timeout: Duration,
}

impl GitRepo {
    /// Open a repository rooted at `path`. Fails if `path/.git` is absent.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, GitError> {
        let path = path.into();
        let git_dir = path.join(".git");
        if !git_dir.exists() {
            return Err(GitError::NotARepo(path));
        }
        Ok(Self {
            path,
            git_dir,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn workdir(&self) -> &Path {
        &self.path
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    // -------------------------------------------------------------------------
    // Process runner
    // -------------------------------------------------------------------------

    fn run(&self, args: &[&str]) -> Result<String, GitError> {
        self.run_env(args, &HashMap::new())
    }

    fn run_env(&self, args: &[&str], env: &HashMap<String, String>) -> Result<String, GitError> {
        let out = self.run_bytes(args, env)?;
        Ok(String::from_utf8_lossy(&out).trim_end().to_string())
    }

    /// Run git, capturing raw stdout. Kills the child at the timeout.
    fn run_bytes(
        &self,
        args: &[&str],
        env: &HashMap<String, String>,
    ) -> Result<Vec<u8>, GitError> {
        let argv: Vec<String> = args.iter().map(|s| s.to_string()).collect();

        let mut cmd = Command::new("git");
        cmd.args(args)
            .current_dir(&self.path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (k, v) in env {
            cmd.env(k, v);
        }

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                GitError::MissingBinary(e)
            } else {
                GitError::Io(e)
            }
        })?;

        let stdout = drain_thread(child.stdout.take());
        let stderr = drain_thread(child.stderr.take());

        let status = match wait_deadline(&mut child, self.timeout)? {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(GitError::Timeout {
                    argv,
                    timeout_secs: self.timeout.as_secs(),
                });
            }
        };

        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();

        if status.success() {
            Ok(stdout)
        } else {
            Err(GitError::Command {
                argv,
                exit_code: status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&stderr).trim_end().to_string(),
            })
        }
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Current branch name, or `None` when HEAD is detached or unborn-empty.
    pub fn current_branch(&self) -> Result<Option<String>, GitError> {
        let out = self.run(&["branch", "--show-current"])?;
        Ok(if out.is_empty() { None } else { Some(out) })
    }

    /// Resolve a revision to a full oid; `None` if it does not exist.
    pub fn rev_parse(&self, rev: &str) -> Result<Option<String>, GitError> {
        match self.run(&["rev-parse", "--verify", "--quiet", rev]) {
            Ok(oid) => Ok(Some(oid)),
            Err(GitError::Command { exit_code: 1, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Tree oid of a commit-ish, `None` if the rev does not resolve.
    pub fn tree_of(&self, rev: &str) -> Result<Option<String>, GitError> {
        self.rev_parse(&format!("{rev}^{{tree}}"))
    }

    /// Refs matching a glob, with commit times.
    pub fn list_refs(&self, glob: &str) -> Result<Vec<RefInfo>, GitError> {
        let out = self.run(&[
            "for-each-ref",
            "--format=%(refname) %(objectname) %(committerdate:unix)",
            glob,
        ])?;
        let mut refs = Vec::new();
        for line in out.lines().filter(|l| !l.is_empty()) {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next(), parts.next()) {
                (Some(name), Some(oid), Some(ts)) => refs.push(RefInfo {
                    name: name.to_string(),
                    oid: oid.to_string(),
                    committed_at: ts.parse().map_err(|_| GitError::Parse {
                        argv: vec!["for-each-ref".into()],
                        detail: format!("bad committerdate in {line:?}"),
                    })?,
                }),
                _ => {
                    return Err(GitError::Parse {
                        argv: vec!["for-each-ref".into()],
                        detail: format!("short ref line {line:?}"),
                    });
                }
            }
        }
        Ok(refs)
    }

    /// Committer time of a commit-ish, unix seconds.
    pub fn commit_time(&self, rev: &str) -> Result<i64, GitError> {
        let out = self.run(&["log", "-1", "--format=%ct", rev, "--"])?;
        out.trim().parse().map_err(|_| GitError::Parse {
            argv: vec!["log".into(), rev.into()],
            detail: format!("bad commit time {out:?}"),
        })
    }

    /// `status --porcelain`, optionally scoped to one path.
    pub fn status_porcelain(&self, path: Option<&str>) -> Result<Vec<String>, GitError> {
        let out = match path {
            Some(p) => self.run(&["status", "--porcelain", "--", p])?,
            None => self.run(&["status", "--porcelain"])?,
        };
        Ok(out.lines().map(str::to_string).collect())
    }

    /// Untracked + modified files, the candidate set for a snapshot.
    pub fn snapshot_candidates(&self) -> Result<Vec<PathBuf>, GitError> {
        let out = self.run_bytes(
            &["ls-files", "-z", "--others", "--modified", "--exclude-standard"],
            &HashMap::new(),
        )?;
        Ok(out
            .split(|b| *b == 0)
            .filter(|chunk| !chunk.is_empty())
            .map(|chunk| PathBuf::from(String::from_utf8_lossy(chunk).into_owned()))
            .collect())
    }

    /// Raw blob contents of `path` at `rev`.
    pub fn read_blob(&self, rev: &str, path: &str) -> Result<Vec<u8>, GitError> {
        self.run_bytes(&["cat-file", "blob", &format!("{rev}:{path}")], &HashMap::new())
    }

    /// Whether `path` exists in the tree of `rev`.
    pub fn blob_exists(&self, rev: &str, path: &str) -> Result<bool, GitError> {
        match self.run(&["cat-file", "-e", &format!("{rev}:{path}")]) {
            Ok(_) => Ok(true),
            Err(GitError::Command { exit_code: 1, .. }) => Ok(false),
            Err(GitError::Command { exit_code: 128, .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Unified diff of `path` between `rev` and the working tree.
    pub fn diff_path(&self, rev: &str, path: &str) -> Result<String, GitError> {
        self.run(&["diff", rev, "--", path])
    }

    /// `diff --shortstat a b`, tolerant of omitted clauses.
    pub fn diff_shortstat(&self, a: &str, b: &str) -> Result<DiffStat, GitError> {
        let out = self.run(&["diff", "--shortstat", a, b])?;
        Ok(parse_shortstat(&out))
    }

    /// Paths changed between two tree-ish revs.
    pub fn changed_paths(&self, a: &str, b: &str) -> Result<Vec<String>, GitError> {
        let out = self.run_bytes(
            &["diff-tree", "-r", "-z", "--name-only", a, b],
            &HashMap::new(),
        )?;
        Ok(out
            .split(|byte| *byte == 0)
            .filter(|chunk| !chunk.is_empty())
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect())
    }

    /// Merge base of all given commits, `None` when histories are unrelated.
    pub fn merge_base_octopus(&self, revs: &[&str]) -> Result<Option<String>, GitError> {
        let mut args = vec!["merge-base", "--octopus"];
        args.extend_from_slice(revs);
        match self.run(&args) {
            Ok(oid) => Ok(Some(oid)),
            Err(GitError::Command { exit_code: 1, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// URL of a configured remote, `None` when unset.
    pub fn remote_url(&self, remote: &str) -> Result<Option<String>, GitError> {
        match self.run(&["remote", "get-url", remote]) {
            Ok(url) if !url.is_empty() => Ok(Some(url)),
            Ok(_) => Ok(None),
            Err(GitError::Command { exit_code: 2, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Marker explaining why the working tree is busy, if it is.
    ///
    /// A fresh `index.lock` means another git process is mid-write; one older
    /// than a day is reported as stale so callers can warn the user.
    pub fn busy_reason(&self) -> Option<&'static str> {
        for marker in BUSY_MARKERS {
            if self.git_dir.join(marker).exists() {
                return Some(marker);
            }
        }

        let lock = self.git_dir.join("index.lock");
        if let Ok(meta) = lock.symlink_metadata() {
            let stale = meta
                .modified()
                .ok()
                .and_then(|m| m.elapsed().ok())
                .is_some_and(|age| age.as_secs() > STALE_LOCK_HOURS * 3600);
            if stale {
                return Some("index.lock (stale)");
            }
            return Some("index.lock");
        }
        None
    }

    // -------------------------------------------------------------------------
    // Shadow index staging
    // -------------------------------------------------------------------------

    fn index_env(index_path: &Path) -> HashMap<String, String> {
        HashMap::from([(
            "GIT_INDEX_FILE".to_string(),
            index_path.to_string_lossy().into_owned(),
        )])
    }

    /// Stage the entire working tree into the isolated index at `index_path`,
    /// honoring `.gitignore` plus `extra_ignores` from the config cascade.
    ///
    /// The user's real index is untouched: the only write target is the
    /// isolated index (plus blob objects, which are content-addressed and
    /// invisible until referenced).
    pub fn stage_all_shadow(
        &self,
        index_path: &Path,
        extra_ignores: &[String],
    ) -> Result<(), GitError> {
        let env = Self::index_env(index_path);
        if extra_ignores.is_empty() {
            self.run_env(&["add", "--all", "."], &env)?;
            return Ok(());
        }

        // Route config ignores through a transient excludes file so git's own
        // ignore machinery applies them alongside .gitignore.
        let excludes = self.git_dir.join("pulsar_exclude");
        std::fs::write(&excludes, extra_ignores.join("\n") + "\n")?;
        let excludes_arg = format!("core.excludesFile={}", excludes.display());
        let result = self.run_env(&["-c", &excludes_arg, "add", "--all", "."], &env);
        let _ = std::fs::remove_file(&excludes);
        result.map(|_| ())
    }

    /// `write-tree` against the isolated index.
    pub fn write_tree_shadow(&self, index_path: &Path) -> Result<String, GitError> {
        self.run_env(&["write-tree"], &Self::index_env(index_path))
    }

    /// `write-tree` against the user's real index.
    pub fn write_tree(&self) -> Result<String, GitError> {
        self.run(&["write-tree"])
    }

    /// Populate the isolated index from a tree-ish.
    pub fn read_tree_shadow(&self, treeish: &str, index_path: &Path) -> Result<(), GitError> {
        self.run_env(&["read-tree", treeish], &Self::index_env(index_path))?;
        Ok(())
    }

    /// Trivial three-way merge into the isolated index. Content-level
    /// conflicts are left unmerged for [`Self::unmerged_paths_shadow`].
    pub fn read_tree_merge_shadow(
        &self,
        base: &str,
        ours: &str,
        theirs: &str,
        index_path: &Path,
    ) -> Result<(), GitError> {
        self.run_env(
            &["read-tree", "-m", "-i", "--aggressive", base, ours, theirs],
            &Self::index_env(index_path),
        )?;
        Ok(())
    }

    /// Paths left unmerged in the isolated index after a merge read.
    pub fn unmerged_paths_shadow(&self, index_path: &Path) -> Result<Vec<String>, GitError> {
        let out = self.run_bytes(
            &["ls-files", "-z", "--unmerged"],
            &Self::index_env(index_path),
        )?;
        let mut paths: Vec<String> = Vec::new();
        for chunk in out.split(|b| *b == 0).filter(|c| !c.is_empty()) {
            let line = String::from_utf8_lossy(chunk);
            // Format: "<mode> <oid> <stage>\t<path>"
            if let Some((_, path)) = line.split_once('\t')
                && paths.last().map(String::as_str) != Some(path)
            {
                paths.push(path.to_string());
            }
        }
        Ok(paths)
    }

    /// Check out a tree into the working tree and real index
    /// (`read-tree -u -m`). Used only by foreground `sync` after
    /// confirmation; the branch ref is not moved.
    pub fn read_tree_update(&self, treeish: &str) -> Result<(), GitError> {
        self.run(&["read-tree", "-u", "-m", treeish])?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Commits and refs
    // -------------------------------------------------------------------------

    /// `commit-tree` with ordered parents.
    pub fn commit_tree(
        &self,
        tree: &str,
        parents: &[&str],
        message: &str,
    ) -> Result<String, GitError> {
        let mut args = vec!["commit-tree".to_string(), tree.to_string()];
        for p in parents {
            args.push("-p".to_string());
            args.push(p.to_string());
        }
        args.push("-m".to_string());
        args.push(message.to_string());
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(&refs)
    }

    /// Compare-and-swap ref update. `old = None` asserts the ref does not
    /// exist yet, so two first-writers cannot both win.
    pub fn update_ref_cas(
        &self,
        ref_name: &str,
        new_oid: &str,
        old_oid: Option<&str>,
    ) -> Result<(), GitError> {
        let old = old_oid.unwrap_or("");
        match self.run(&["update-ref", "-m", "pulsar snapshot", ref_name, new_oid, old]) {
            Ok(_) => Ok(()),
            Err(GitError::Command { .. }) => Err(GitError::RefCasFailed {
                ref_name: ref_name.to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    /// Delete a ref, optionally guarded on its current value.
    pub fn delete_ref(&self, ref_name: &str, old_oid: Option<&str>) -> Result<(), GitError> {
        match old_oid {
            Some(old) => self.run(&["update-ref", "-d", ref_name, old])?,
            None => self.run(&["update-ref", "-d", ref_name])?,
        };
        Ok(())
    }

    /// Quarantine a ref whose target object is missing: repoint a `.broken`
    /// twin at the oid and drop the original so later cycles skip it.
    pub fn quarantine_ref(&self, ref_name: &str, oid: &str) -> Result<(), GitError> {
        let broken = format!("{ref_name}.broken");
        self.run(&["update-ref", "--no-deref", &broken, oid])?;
        self.delete_ref(ref_name, None)
    }

    /// Whether the object a ref points at is present and readable.
    pub fn object_exists(&self, oid: &str) -> Result<bool, GitError> {
        match self.run(&["cat-file", "-e", oid]) {
            Ok(_) => Ok(true),
            Err(GitError::Command { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    // -------------------------------------------------------------------------
    // Remote transfer
    // -------------------------------------------------------------------------

    /// Fetch a refspec from `remote`.
    pub fn fetch(&self, remote: &str, refspec: &str) -> Result<(), GitError> {
        self.run(&["fetch", "--quiet", remote, refspec])?;
        Ok(())
    }

    /// Push a refspec to `remote`. SSH runs in batch mode so a credential
    /// prompt can never wedge the daemon.
    pub fn push(&self, remote: &str, refspec: &str) -> Result<(), GitError> {
        let env = HashMap::from([(
            "GIT_SSH_COMMAND".to_string(),
            "ssh -o BatchMode=yes".to_string(),
        )]);
        self.run_env(&["push", "--quiet", remote, refspec], &env)?;
        Ok(())
    }

    /// `gc --auto` after bulk ref deletion.
    pub fn gc_auto(&self) -> Result<(), GitError> {
        self.run(&["gc", "--auto", "--quiet"])?;
        Ok(())
    }
}

fn drain_thread(
    stream: Option<impl Read + Send + 'static>,
) -> std::thread::JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut stream) = stream {
            let _ = stream.read_to_end(&mut buf);
        }
        buf
    })
}

/// Poll the child until exit or deadline. `None` means the deadline passed.
fn wait_deadline(
    child: &mut Child,
    timeout: Duration,
) -> Result<Option<std::process::ExitStatus>, GitError> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        std::thread::sleep(Duration::from_millis(25));
    }
}

fn parse_shortstat(out: &str) -> DiffStat {
    let mut stat = DiffStat::default();
    for clause in out.split(',') {
        let clause = clause.trim();
        let Some(n) = clause
            .split_whitespace()
            .next()
            .and_then(|w| w.parse::<u64>().ok())
        else {
            continue;
        };
        if clause.contains("file") {
            stat.files_changed = n;
        } else if clause.contains("insertion") {
            stat.insertions = n;
        } else if clause.contains("deletion") {
            stat.deletions = n;
        }
    }
    stat
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shortstat_full_clause() {
        let s = parse_shortstat(" 3 files changed, 10 insertions(+), 2 deletions(-)");
        assert_eq!(
            s,
            DiffStat {
                files_changed: 3,
                insertions: 10,
                deletions: 2
            }
        );
    }

    #[test]
    fn shortstat_tolerates_omitted_clauses() {
        let s = parse_shortstat(" 1 file changed, 5 insertions(+)");
        assert_eq!(s.files_changed, 1);
        assert_eq!(s.insertions, 5);
        assert_eq!(s.deletions, 0);

        let s = parse_shortstat(" 2 files changed, 4 deletions(-)");
        assert_eq!(s.insertions, 0);
        assert_eq!(s.deletions, 4);
    }

    #[test]
    fn shortstat_empty_output() {
        assert_eq!(parse_shortstat(""), DiffStat::default());
    }

    #[test]
    fn branch_encoding_roundtrip() {
        for branch in ["main", "feature/x", "a/b/c", "odd%name"] {
            assert_eq!(decode_branch(&encode_branch(branch)), branch);
        }
        assert!(!encode_branch("feature/x").contains('/'));
    }

    #[test]
    fn open_rejects_non_repo() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            GitRepo::open(dir.path()),
            Err(GitError::NotARepo(_))
        ));
    }
}
