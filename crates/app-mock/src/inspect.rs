//! Host introspection: shared memory, IPC namespace and cgroups.
//!
//! Shell utilities are invoked synchronously from the request's point of
//! view (spawn and wait, no timeout). `HostInspector` is the seam tests use
//! to substitute canned output.

use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use tokio::process::Command;
use tracing::{debug, info, trace};

use crate::error::ProbeError;

/// Mount point of the shared memory filesystem.
pub const SHM_MOUNT: &str = "/dev/shm";

/// Namespace link whose inode identifies the IPC namespace.
pub const IPC_NAMESPACE_LINK: &str = "/proc/self/ns/ipc";

// Filesystem  Size  Used  Avail  Use%  Mounted on
// tmpfs         23     0     23    0%  /dev/shm
static SHM_SIZE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"tmpfs\s+([0-9]+)\s+[0-9]+\s+[0-9]+\s+[0-9]+%\s+/dev/shm").expect("valid regex")
});

/// Access to host state that the probe server cannot read from files alone.
#[async_trait]
pub trait HostInspector: Send + Sync {
    /// Raw `df -m /dev/shm` report.
    async fn shm_usage_report(&self) -> Result<String, ProbeError>;

    /// Inode number of this process's IPC namespace, as printed by `stat`.
    async fn ipc_namespace_inode(&self) -> Result<String, ProbeError>;

    /// Deliver SIGTERM to this process.
    fn terminate_self(&self) -> Result<(), ProbeError>;
}

/// `HostInspector` backed by real shell utilities and signals.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemInspector;

#[async_trait]
impl HostInspector for SystemInspector {
    async fn shm_usage_report(&self) -> Result<String, ProbeError> {
        run_checked("df", &["-m", SHM_MOUNT]).await
    }

    async fn ipc_namespace_inode(&self) -> Result<String, ProbeError> {
        run_checked("stat", &["-Lc", "%i", IPC_NAMESPACE_LINK]).await
    }

    fn terminate_self(&self) -> Result<(), ProbeError> {
        kill(Pid::this(), Signal::SIGTERM)?;
        Ok(())
    }
}

async fn run_checked(program: &str, args: &[&str]) -> Result<String, ProbeError> {
    debug!(program, ?args, "running host utility");
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| ProbeError::Spawn {
            program: program.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(ProbeError::Command {
            program: program.to_string(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Extract the size column (MiB) of the `/dev/shm` tmpfs line.
pub fn parse_shm_size(report: &str) -> Result<String, ProbeError> {
    SHM_SIZE_PATTERN
        .captures(report)
        .and_then(|caps| caps.get(1))
        .map(|size| size.as_str().to_string())
        .ok_or_else(|| ProbeError::ShmReport(report.to_string()))
}

/// Best-effort lookup of the process holding `port`, for bind failure logs.
///
/// The pipeline's exit status is ignored; whatever it printed is returned.
pub async fn port_holder_report(port: u16) -> Result<String, ProbeError> {
    let script = format!("ps -a | grep $(lsof -ti :{port})");
    let output = Command::new("sh")
        .args(["-c", &script])
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| ProbeError::Spawn {
            program: "sh".to_string(),
            source,
        })?;

    let mut report = String::from_utf8_lossy(&output.stdout).into_owned();
    report.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok(report.trim().to_string())
}

/// Memory and cpu controller files of this process's cgroups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CgroupSnapshot {
    pub memory: BTreeMap<String, String>,
    pub cpu: BTreeMap<String, String>,
}

/// Reads cgroup membership and controller files.
#[derive(Debug, Clone)]
pub struct CgroupReader {
    proc_cgroup: PathBuf,
    cgroup_root: PathBuf,
}

impl Default for CgroupReader {
    fn default() -> Self {
        Self::new("/proc/self/cgroup", "/sys/fs/cgroup")
    }
}

impl CgroupReader {
    pub fn new(proc_cgroup: impl Into<PathBuf>, cgroup_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_cgroup: proc_cgroup.into(),
            cgroup_root: cgroup_root.into(),
        }
    }

    /// Cgroup path of `controller`, or `None` if no hierarchy lists it.
    pub fn cgroup_path(&self, controller: &str) -> Result<Option<String>, ProbeError> {
        info!(controller, "looking up own cgroup");
        let contents = read_file(&self.proc_cgroup)?;
        let path = find_cgroup_path(&contents, controller)?;
        info!(controller, path = ?path, "resolved cgroup");
        Ok(path)
    }

    /// Every readable file in the controller's cgroup directory, trimmed.
    ///
    /// Entries that cannot be read as text are skipped.
    pub fn read_controller(&self, controller: &str) -> Result<BTreeMap<String, String>, ProbeError> {
        let mut values = BTreeMap::new();
        let Some(cgroup) = self.cgroup_path(controller)? else {
            return Ok(values);
        };

        // cgroup paths are absolute within the hierarchy, so append rather than join
        let mut dir = self.cgroup_root.join(controller).into_os_string();
        dir.push(&cgroup);
        let dir = PathBuf::from(dir);

        let entries = fs::read_dir(&dir).map_err(|source| ProbeError::Io {
            path: dir.clone(),
            source,
        })?;

        for entry in entries.flatten() {
            let path = entry.path();
            match fs::read_to_string(&path) {
                Ok(contents) => {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    values.insert(name, contents.trim().to_string());
                }
                Err(e) => trace!(path = %path.display(), error = %e, "skipping unreadable cgroup file"),
            }
        }

        Ok(values)
    }

    pub fn snapshot(&self) -> Result<CgroupSnapshot, ProbeError> {
        Ok(CgroupSnapshot {
            memory: self.read_controller("memory")?,
            cpu: self.read_controller("cpu")?,
        })
    }
}

/// Find the path for `controller` in `/proc/<pid>/cgroup` contents.
///
/// Each line is `hierarchy-id:controller[,controller...]:path`.
pub fn find_cgroup_path(contents: &str, controller: &str) -> Result<Option<String>, ProbeError> {
    for line in contents.lines().map(str::trim).filter(|l| !l.is_empty()) {
        trace!(line, "/proc/self/cgroup");
        let mut fields = line.splitn(3, ':');
        let (Some(_id), Some(controllers), Some(path)) = (fields.next(), fields.next(), fields.next())
        else {
            return Err(ProbeError::MalformedCgroup(line.to_string()));
        };

        if controllers.split(',').any(|c| c == controller) {
            return Ok(Some(path.to_string()));
        }
    }
    Ok(None)
}

fn read_file(path: &Path) -> Result<String, ProbeError> {
    fs::read_to_string(path).map_err(|source| ProbeError::Io {
        path: path.to_path_buf(),
        source,
    })
}
