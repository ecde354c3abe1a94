//! Shared session state, guarded by a single lock.

use std::sync::{Condvar, Mutex};

use crate::types::{
    LaunchMode, PauseReason, SessionSnapshot, SessionState, SourceLocation,
};

#[derive(Debug, Default)]
pub(crate) struct SessionCore {
    pub state: Option<SessionState>,
    pub pid: Option<u32>,
    pub launch_mode: Option<LaunchMode>,
    pub process_name: Option<String>,
    pub runtime_version: Option<String>,
    pub pause_reason: Option<PauseReason>,
    pub active_thread: Option<u32>,
    pub breakpoint_id: Option<String>,
    pub location: Option<SourceLocation>,
    pub exit_code: Option<i32>,
}

impl SessionCore {
    fn state(&self) -> SessionState {
        self.state.unwrap_or(SessionState::Disconnected)
    }
}

/// Session state shared between the request path and the event pump.
/// Only one holder may transition state at a time; event-driven
/// transitions take the same lock as request-driven ones.
#[derive(Debug, Default)]
pub(crate) struct SessionShared {
    core: Mutex<SessionCore>,
    changed: Condvar,
}

impl SessionShared {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn state(&self) -> SessionState {
        self.core.lock().expect("session state poisoned").state()
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        let core = self.core.lock().expect("session state poisoned");
        SessionSnapshot {
            state: core.state(),
            pid: core.pid,
            launch_mode: core.launch_mode,
            process_name: core.process_name.clone(),
            runtime_version: core.runtime_version.clone(),
            pause_reason: core.pause_reason,
            active_thread_id: core.active_thread,
            breakpoint_id: core.breakpoint_id.clone(),
            current_location: core.location.clone(),
            exit_code: core.exit_code,
        }
    }

    /// The thread the current pause landed on, if paused.
    pub(crate) fn active_thread(&self) -> Option<u32> {
        let core = self.core.lock().expect("session state poisoned");
        core.active_thread
    }

    pub(crate) fn begin_attaching(&self, launch_mode: LaunchMode) {
        let mut core = self.core.lock().expect("session state poisoned");
        *core = SessionCore {
            state: Some(SessionState::Attaching),
            launch_mode: Some(launch_mode),
            ..SessionCore::default()
        };
        drop(core);
        self.changed.notify_all();
    }

    pub(crate) fn attach_succeeded(&self, pid: u32, process_name: String, runtime_version: String) {
        let mut core = self.core.lock().expect("session state poisoned");
        core.state = Some(SessionState::Running);
        core.pid = Some(pid);
        core.process_name = Some(process_name);
        core.runtime_version = Some(runtime_version);
        drop(core);
        self.changed.notify_all();
    }

    pub(crate) fn set_running(&self) {
        let mut core = self.core.lock().expect("session state poisoned");
        if matches!(core.state(), SessionState::Exited | SessionState::Disconnected) {
            return;
        }
        core.state = Some(SessionState::Running);
        core.pause_reason = None;
        core.active_thread = None;
        core.breakpoint_id = None;
        core.location = None;
        drop(core);
        self.changed.notify_all();
    }

    pub(crate) fn set_paused(
        &self,
        reason: PauseReason,
        thread_id: u32,
        location: Option<SourceLocation>,
        breakpoint_id: Option<String>,
    ) {
        let mut core = self.core.lock().expect("session state poisoned");
        if matches!(core.state(), SessionState::Exited | SessionState::Disconnected) {
            return;
        }
        core.state = Some(SessionState::Paused);
        core.pause_reason = Some(reason);
        core.active_thread = Some(thread_id);
        core.breakpoint_id = breakpoint_id;
        core.location = location;
        drop(core);
        self.changed.notify_all();
    }

    pub(crate) fn set_exited(&self, exit_code: i32) {
        let mut core = self.core.lock().expect("session state poisoned");
        core.state = Some(SessionState::Exited);
        core.pause_reason = None;
        core.active_thread = None;
        core.breakpoint_id = None;
        core.location = None;
        core.exit_code = Some(exit_code);
        drop(core);
        self.changed.notify_all();
    }

    pub(crate) fn reset_disconnected(&self) {
        let mut core = self.core.lock().expect("session state poisoned");
        *core = SessionCore::default();
        drop(core);
        self.changed.notify_all();
    }

    /// Block until the session reaches `wanted` or the deadline passes.
    pub(crate) fn wait_for_state(
        &self,
        wanted: SessionState,
        deadline: std::time::Instant,
    ) -> bool {
        let mut core = self.core.lock().expect("session state poisoned");
        loop {
            if core.state() == wanted {
                return true;
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .changed
                .wait_timeout(core, deadline - now)
                .expect("session state poisoned");
            core = guard;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_is_disconnected() {
        let shared = SessionShared::new();
        assert_eq!(shared.state(), SessionState::Disconnected);
        assert!(shared.snapshot().pid.is_none());
    }

    #[test]
    fn pause_after_exit_is_ignored() {
        let shared = SessionShared::new();
        shared.begin_attaching(LaunchMode::Attach);
        shared.attach_succeeded(10, "app".into(), "9.0".into());
        shared.set_exited(0);
        shared.set_paused(PauseReason::Breakpoint, 1, None, None);
        assert_eq!(shared.state(), SessionState::Exited);
    }

    #[test]
    fn snapshot_reflects_pause_details() {
        let shared = SessionShared::new();
        shared.begin_attaching(LaunchMode::Launch);
        shared.attach_succeeded(10, "app".into(), "9.0".into());
        shared.set_paused(
            PauseReason::Breakpoint,
            4,
            Some(SourceLocation::new("/src/a.cs", 3)),
            Some("bp-1".into()),
        );
        let snapshot = shared.snapshot();
        assert_eq!(snapshot.state, SessionState::Paused);
        assert_eq!(snapshot.active_thread_id, Some(4));
        assert_eq!(snapshot.breakpoint_id.as_deref(), Some("bp-1"));
        assert_eq!(snapshot.launch_mode, Some(LaunchMode::Launch));
    }
}
