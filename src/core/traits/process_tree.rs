use std::io;

/// Access to the operating system's process table.
///
/// Teardown of a runner's process tree goes exclusively through this trait
/// so the supervisor does not depend on how a platform exposes parent/child
/// relations.
#[mockall::automock]
pub trait ProcessTree: std::fmt::Debug + Send + Sync {
    /// Ids of live processes whose parent is `pid`.
    fn children(&self, pid: u32) -> io::Result<Vec<u32>>;

    /// `false` once the process has exited, including zombies.
    fn is_alive(&self, pid: u32) -> bool;

    /// Asks the process to terminate.
    fn interrupt(&self, pid: u32) -> io::Result<()>;

    /// Terminates the process immediately.
    fn kill(&self, pid: u32) -> io::Result<()>;
}
