use nix::{
    errno::Errno,
    sys::wait::{waitpid, WaitStatus},
    unistd::{fork, ForkResult, Pid},
};
use tracing::warn;

use crate::CacheResult;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Which role this process plays after worker setup.
#[derive(Debug)]
pub enum WorkerRole {
    /// The supervising parent; it should wait on the children and serve
    /// nothing itself.
    Parent(Vec<Pid>),

    /// A serving process. Also the answer when no forking was requested.
    Worker,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Forks `count` worker processes. Each worker opens its own channels, so
/// the kernel distributes requests across them.
pub fn fork_workers(count: usize) -> CacheResult<WorkerRole> {
    if count <= 1 {
        return Ok(WorkerRole::Worker);
    }
    let mut children = Vec::with_capacity(count);
    for _ in 0..count {
        match unsafe { fork() }? {
            ForkResult::Child => return Ok(WorkerRole::Worker),
            ForkResult::Parent { child } => children.push(child),
        }
    }
    Ok(WorkerRole::Parent(children))
}

/// Waits until every worker has exited, logging unclean exits.
pub fn wait_for_workers(children: &[Pid]) -> CacheResult<()> {
    for &pid in children {
        match waitpid(pid, None) {
            Result::Ok(WaitStatus::Exited(_, 0)) => {}
            Result::Ok(status) => warn!("worker {} exited uncleanly: {:?}", pid, status),
            Err(Errno::ECHILD) => break,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}
