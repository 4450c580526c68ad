use std::{
    fs, io,
    path::{Path, PathBuf},
};

use crate::core::traits::process_tree::ProcessTree;

/// Process table backed by Linux procfs, signalling through `kill(2)`.
#[derive(Clone, Debug)]
pub struct ProcfsProcessTree {
    root: PathBuf,
}

impl Default for ProcfsProcessTree {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ProcfsProcessTree {
    pub fn new<T: AsRef<Path>>(root: T) -> Self {
        ProcfsProcessTree {
            root: root.as_ref().into(),
        }
    }

    fn stat(&self, pid: u32) -> io::Result<ProcStat> {
        let content = fs::read_to_string(self.root.join(pid.to_string()).join("stat"))?;
        ProcStat::parse(&content).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("malformed stat of process {}", pid),
            )
        })
    }
}

impl ProcessTree for ProcfsProcessTree {
    fn children(&self, pid: u32) -> io::Result<Vec<u32>> {
        let mut children = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let Some(candidate) = entry?.file_name().to_str().and_then(|name| name.parse().ok())
            else {
                continue;
            };

            // Processes may exit while the table is being read
            match self.stat(candidate) {
                Ok(stat) if stat.ppid == pid && stat.is_running() => children.push(candidate),
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => tracing::trace!(pid = candidate, error = %e, "Failed to read process stat"),
            }
        }
        children.sort_unstable();
        Ok(children)
    }

    fn is_alive(&self, pid: u32) -> bool {
        self.stat(pid).is_ok_and(|stat| stat.is_running())
    }

    fn interrupt(&self, pid: u32) -> io::Result<()> {
        signal(pid, libc::SIGTERM)
    }

    fn kill(&self, pid: u32) -> io::Result<()> {
        signal(pid, libc::SIGKILL)
    }
}

/// Fields of `/proc/<pid>/stat` needed to walk the process tree.
#[derive(Debug, PartialEq, Eq)]
struct ProcStat {
    state: char,
    ppid: u32,
}

impl ProcStat {
    /// The command name is enclosed in parentheses and may itself contain
    /// spaces and parentheses, so fields are counted from the last `)`.
    fn parse(content: &str) -> Option<Self> {
        let (_, rest) = content.rsplit_once(')')?;
        let mut fields = rest.split_whitespace();
        let state = fields.next()?.chars().next()?;
        let ppid = fields.next()?.parse().ok()?;
        Some(ProcStat { state, ppid })
    }

    fn is_running(&self) -> bool {
        !matches!(self.state, 'Z' | 'X' | 'x')
    }
}

fn signal(pid: u32, signal: libc::c_int) -> io::Result<()> {
    // 0 and negative ids address process groups
    let pid = match libc::pid_t::try_from(pid) {
        Ok(pid) if pid > 0 => pid,
        _ => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid process id {}", pid),
            ));
        }
    };

    if unsafe { libc::kill(pid, signal) } == 0 {
        return Ok(());
    }

    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        // Already gone
        return Ok(());
    }
    Err(err)
}
