//! Some outcomes can't be checked from inside the test process: a deadlock never returns
//! and an abort takes the whole test binary down with it.
//!
//! So such tests run twice. The parent re-executes the test binary filtered down to the very same
//! test with [CHILD_MARKER] set; the child sees the marker and does the bad thing, while the parent
//! watches what happens to the child from outside.

use std::{
    env,
    process::{Child, Command, ExitStatus, Stdio},
    thread::sleep,
    time::{Duration, Instant},
};

pub(crate) const CHILD_MARKER: &str = "FUTEX_LOCKS_TEST_CHILD";

pub(crate) fn is_child() -> bool {
    env::var_os(CHILD_MARKER).is_some()
}

/// libtest's name for a test: the module path without the crate name
pub(crate) fn test_path(module_path: &str, test: &str) -> String {
    let module = module_path
        .split_once("::")
        .map_or(module_path, |(_, rest)| rest);
    format!("{module}::{test}")
}

fn spawn(test: &str) -> Child {
    let binary = env::current_exe().expect("test binary path");
    Command::new(binary)
        .args([test, "--exact", "--test-threads=1", "--nocapture"])
        .env(CHILD_MARKER, "1")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn the child test process")
}

/// Polls the child until it exits or the time is up
fn wait_for(child: &mut Child, timeout: Duration) -> Option<ExitStatus> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait().expect("poll the child") {
            return Some(status);
        }
        if Instant::now() >= deadline {
            return None;
        }
        sleep(Duration::from_millis(10));
    }
}

/// The test must still be running after `grace`
pub(crate) fn assert_hangs(test: &str, grace: Duration) {
    let mut child = spawn(test);
    let status = wait_for(&mut child, grace);
    child.kill().ok();
    child.wait().ok();
    assert!(status.is_none(), "{test} finished with {status:?}, expected it to hang");
}

/// The test must die of SIGABRT
pub(crate) fn assert_aborts(test: &str) {
    let mut child = spawn(test);
    let status = wait_for(&mut child, Duration::from_secs(30));
    if status.is_none() {
        child.kill().ok();
        child.wait().ok();
    }
    let status = status.unwrap_or_else(|| panic!("{test} didn't finish"));
    assert!(!status.success(), "{test} succeeded, expected an abort");

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(status.signal(), Some(libc::SIGABRT), "{test} exited with {status}");
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn libtest_name() {
        assert_eq!(
            test_path("futex_locks::mutex::test", "double_unlock_aborts"),
            "mutex::test::double_unlock_aborts"
        );
    }
}
