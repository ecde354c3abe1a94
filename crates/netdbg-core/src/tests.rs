//! End-to-end scenarios driving the session controller against the
//! scripted target runtime and synthetic PDBs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use netdbg_symbols::testing::{PdbBuilder, PointSpec};
use netdbg_symbols::MethodToken;

use crate::error::{DebugError, TargetError};
use crate::harness::{managed_frame, native_frame, Script, ScriptedWorld};
use crate::hits::WaitOutcome;
use crate::inspect::ScopeFilter;
use crate::manager::{BreakpointRequest, ExceptionBreakpointRequest};
use crate::modules::{MemberQuery, SearchKind, TypeQuery};
use crate::session::DebugSession;
use crate::target::{RawTypeInfo, RawTypeLayout, RawLayoutField, ResumeDecision, StepMode};
use crate::types::{
    BreakpointState, FieldEntry, MethodEntry, PauseReason, ReferenceDirection, ReferenceKind,
    SessionState, TypeKind, TypeRef, Visibility,
};

const PID: u32 = 4242;
const MAIN_SOURCE: &str = "/src/App/Main.cs";
const WAIT: Duration = Duration::from_secs(5);
const SHORT_WAIT: Duration = Duration::from_millis(100);

static NEXT_DIR: AtomicUsize = AtomicUsize::new(0);

fn init_logging() {
    use std::sync::Once;
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

struct Fixture {
    session: DebugSession,
    script: Arc<Script>,
    module_path: String,
    main_method: MethodToken,
}

/// A module whose PDB maps `MAIN_SOURCE`: line 10 at IL 0, line 11 at
/// IL 8, line 17 at IL 16.
fn standard_pdb() -> (PdbBuilder, MethodToken) {
    let mut builder = PdbBuilder::new();
    let doc = builder.document(MAIN_SOURCE);
    let main = builder.method(
        doc,
        &[
            PointSpec::line(0, 10, 9, 20),
            PointSpec::line(8, 11, 9, 30),
            PointSpec::line(16, 17, 13, 25),
        ],
    );
    (builder, main)
}

fn write_module(builder: &PdbBuilder) -> String {
    let id = NEXT_DIR.fetch_add(1, Ordering::Relaxed);
    let mut dir = std::env::temp_dir();
    dir.push(format!("netdbg-core-{id}"));
    std::fs::create_dir_all(&dir).unwrap();
    let module = dir.join("App.dll");
    std::fs::write(&module, b"pe stub").unwrap();
    std::fs::write(dir.join("App.pdb"), builder.build()).unwrap();
    module.to_string_lossy().to_string()
}

fn fixture() -> Fixture {
    init_logging();
    let (builder, main_method) = standard_pdb();
    let module_path = write_module(&builder);

    let mut world = ScriptedWorld::new(PID, "App");
    world.add_module("App", &module_path, 0x7000_0000, 0x10000);
    world.add_thread(
        1,
        Some("Main"),
        vec![managed_frame("App.Program.Main", "App", &module_path, main_method, 0)],
    );

    let script = Script::new(world);
    let session = DebugSession::new(Box::new(script.connector()));
    Fixture {
        session,
        script,
        module_path,
        main_method,
    }
}

fn bp_at(line: u32, condition: Option<&str>) -> BreakpointRequest {
    BreakpointRequest {
        file: MAIN_SOURCE.into(),
        line,
        column: None,
        condition: condition.map(str::to_string),
    }
}

// ----- lifecycle and state machine -----------------------------------

#[test]
fn attach_transitions_to_running() {
    let fx = fixture();
    assert_eq!(fx.session.snapshot().state, SessionState::Disconnected);

    let snapshot = fx.session.attach(PID, None).unwrap();
    assert_eq!(snapshot.state, SessionState::Running);
    assert_eq!(snapshot.pid, Some(PID));
    assert_eq!(snapshot.process_name.as_deref(), Some("App"));
    assert_eq!(snapshot.runtime_version.as_deref(), Some("9.0.0"));

    let err = fx.session.attach(PID, None).unwrap_err();
    assert!(matches!(err, DebugError::AlreadyAttached));
}

#[test]
fn attach_failure_resets_to_disconnected() {
    let fx = fixture();
    fx.script
        .with_world(|world| world.fail_next_attach(TargetError::PermissionDenied(PID)));
    let err = fx.session.attach(PID, None).unwrap_err();
    assert!(matches!(err, DebugError::PermissionDenied(PID)));
    assert_eq!(fx.session.snapshot().state, SessionState::Disconnected);

    // The failed connection is released and the next attach succeeds.
    fx.session.attach(PID, None).unwrap();
    assert_eq!(fx.script.counters().connects(), 2);
}

#[test]
fn launch_over_an_active_session_is_session_active() {
    let fx = fixture();
    let request = crate::target::LaunchRequest {
        path: "/usr/bin/app".into(),
        ..crate::target::LaunchRequest::default()
    };
    fx.session.launch(&request).unwrap();

    // Opening a second session reports the operation-specific error:
    // launch gets SessionActive, attach gets AlreadyAttached.
    let err = fx.session.launch(&request).unwrap_err();
    assert!(matches!(err, DebugError::SessionActive));
    let err = fx.session.attach(PID, None).unwrap_err();
    assert!(matches!(err, DebugError::AlreadyAttached));

    fx.session.disconnect(false).unwrap();
    fx.session.launch(&request).unwrap();
}

#[test]
fn launch_over_an_attached_session_is_session_active() {
    let fx = fixture();
    fx.session.attach(PID, None).unwrap();
    let request = crate::target::LaunchRequest {
        path: "/usr/bin/app".into(),
        ..crate::target::LaunchRequest::default()
    };
    let err = fx.session.launch(&request).unwrap_err();
    assert!(matches!(err, DebugError::SessionActive));
}

#[test]
fn unknown_pid_is_process_not_found() {
    let fx = fixture();
    let err = fx.session.attach(999, None).unwrap_err();
    assert!(matches!(err, DebugError::ProcessNotFound(999)));
}

#[test]
fn disconnect_requires_a_session() {
    let fx = fixture();
    assert!(matches!(
        fx.session.disconnect(false),
        Err(DebugError::NoSession)
    ));
}

#[test]
fn pause_and_continue_flip_states() {
    let fx = fixture();
    fx.session.attach(PID, None).unwrap();

    assert!(matches!(
        fx.session.continue_run(),
        Err(DebugError::NotPaused)
    ));

    let paused = fx.session.pause().unwrap();
    assert_eq!(paused.state, SessionState::Paused);
    assert_eq!(paused.pause_reason, Some(PauseReason::UserPause));
    assert_eq!(paused.active_thread_id, Some(1));
    // The top frame resolves through the PDB.
    assert_eq!(paused.current_location.as_ref().unwrap().line, 10);

    assert!(matches!(fx.session.pause(), Err(DebugError::NotRunning)));

    let running = fx.session.continue_run().unwrap();
    assert_eq!(running.state, SessionState::Running);
}

#[test]
fn process_exit_is_terminal_until_disconnect() {
    let fx = fixture();
    fx.session.attach(PID, None).unwrap();
    fx.script.exit_process(3);

    let snapshot = fx.session.snapshot();
    assert_eq!(snapshot.state, SessionState::Exited);
    assert_eq!(snapshot.exit_code, Some(3));

    assert!(matches!(fx.session.threads(), Err(DebugError::NoSession)));
    assert!(matches!(
        fx.session.attach(PID, None),
        Err(DebugError::AlreadyAttached)
    ));

    fx.session.disconnect(false).unwrap();
    assert_eq!(fx.session.snapshot().state, SessionState::Disconnected);
    fx.session.attach(PID, None).unwrap();
}

#[test]
fn launch_with_stop_at_entry_pauses() {
    let fx = fixture();
    let request = crate::target::LaunchRequest {
        path: "/usr/bin/app".into(),
        stop_at_entry: true,
        ..crate::target::LaunchRequest::default()
    };
    let snapshot = fx.session.launch(&request).unwrap();
    // The entry-point event may still be in flight right after launch.
    assert!(matches!(
        snapshot.state,
        SessionState::Running | SessionState::Paused
    ));
    assert!(
        fx.session.wait_for_state(SessionState::Paused, WAIT),
        "entry pause never arrived"
    );
    assert_eq!(
        fx.session.snapshot().pause_reason,
        Some(PauseReason::EntryPoint)
    );
}

// ----- scenario 1: pending then bound on attach ----------------------

#[test]
fn breakpoint_set_before_attach_binds_on_attach() {
    let fx = fixture();
    let pending = fx.session.set_breakpoint(&bp_at(10, None)).unwrap();
    assert_eq!(pending.state, BreakpointState::Pending);
    assert!(!pending.verified);

    fx.session.attach(PID, None).unwrap();

    let bound = &fx.session.list_breakpoints()[0];
    assert_eq!(bound.state, BreakpointState::Bound);
    assert!(bound.verified);
    assert_eq!(bound.module_path.as_deref(), Some(fx.module_path.as_str()));
    // Location resolves to the sequence point's span.
    assert_eq!(bound.location.line, 10);
    assert_eq!(bound.location.column, Some(9));
    assert_eq!(bound.location.end_column, Some(20));
    assert!(bound.message.is_none());

    let events = fx.session.drain_breakpoint_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].from, BreakpointState::Pending);
    assert_eq!(events[0].to, BreakpointState::Bound);
}

#[test]
fn breakpoint_without_executable_code_stays_pending_with_diagnostic() {
    let fx = fixture();
    fx.session.attach(PID, None).unwrap();
    let bp = fx.session.set_breakpoint(&bp_at(12, None)).unwrap();
    assert_eq!(bp.state, BreakpointState::Pending);
    assert_eq!(
        bp.message.as_deref(),
        Some("no executable code at line 12")
    );
}

#[test]
fn set_while_attached_binds_immediately() {
    let fx = fixture();
    fx.session.attach(PID, None).unwrap();
    let bp = fx.session.set_breakpoint(&bp_at(11, None)).unwrap();
    assert_eq!(bp.state, BreakpointState::Bound);
    assert!(bp.verified);
}

#[test]
fn dynamic_modules_are_never_bind_candidates() {
    let fx = fixture();
    // Source that only exists in the dynamic module; stays Pending
    // indefinitely.
    fx.session
        .set_breakpoint(&BreakpointRequest {
            file: "/src/Emitted.cs".into(),
            line: 5,
            column: None,
            condition: None,
        })
        .unwrap();
    fx.session.attach(PID, None).unwrap();
    let dynamic = fx
        .script
        .with_world(|world| world.add_dynamic_module("Emitted"));
    fx.script.announce_module(dynamic);
    assert_eq!(fx.script.counters().breakpoints_created(), 0);
    assert_eq!(
        fx.session.list_breakpoints()[0].state,
        BreakpointState::Pending
    );
}

// ----- unbind / rebind round trip ------------------------------------

#[test]
fn module_unload_and_reload_rebinds() {
    let fx = fixture();
    fx.session.set_breakpoint(&bp_at(10, None)).unwrap();
    fx.session.attach(PID, None).unwrap();
    assert_eq!(fx.session.list_breakpoints()[0].state, BreakpointState::Bound);

    fx.script.unload_module("App");
    let unbound = &fx.session.list_breakpoints()[0];
    assert_eq!(unbound.state, BreakpointState::Pending);
    assert!(!unbound.verified);
    assert_eq!(
        unbound.message.as_deref(),
        Some("Module App unloaded; will rebind on reload")
    );

    let module = fx.script.with_world(|world| {
        world.add_module("App", &fx.module_path, 0x7000_0000, 0x10000)
    });
    fx.script.announce_module(module);

    let rebound = &fx.session.list_breakpoints()[0];
    assert_eq!(rebound.state, BreakpointState::Bound);
    assert!(rebound.verified);

    let states: Vec<(BreakpointState, BreakpointState)> = fx
        .session
        .drain_breakpoint_events()
        .into_iter()
        .map(|event| (event.from, event.to))
        .collect();
    assert_eq!(
        states,
        vec![
            (BreakpointState::Pending, BreakpointState::Bound),
            (BreakpointState::Bound, BreakpointState::Pending),
            (BreakpointState::Pending, BreakpointState::Bound),
        ]
    );

    // Handles: bound on attach, released on unload, bound again.
    assert_eq!(fx.script.counters().breakpoints_created(), 2);
    assert_eq!(fx.script.counters().breakpoints_released(), 1);
}

// ----- hits and conditions -------------------------------------------

#[test]
fn breakpoint_hit_pauses_and_delivers_to_waiter() {
    let fx = fixture();
    fx.session.set_breakpoint(&bp_at(10, None)).unwrap();
    fx.session.attach(PID, None).unwrap();

    let decision = fx.script.fire_breakpoint(1, fx.main_method, 0).unwrap();
    assert_eq!(decision, ResumeDecision::RemainPaused);

    let snapshot = fx.session.snapshot();
    assert_eq!(snapshot.state, SessionState::Paused);
    assert_eq!(snapshot.pause_reason, Some(PauseReason::Breakpoint));
    assert_eq!(snapshot.breakpoint_id.as_deref(), Some("bp-1"));

    let WaitOutcome::Hit(hit) = fx.session.wait_for_hit(WAIT, None).unwrap() else {
        panic!("expected a hit");
    };
    assert_eq!(hit.breakpoint_id, "bp-1");
    assert_eq!(hit.thread_id, 1);
    assert_eq!(hit.hit_count, 1);
    assert_eq!(hit.location.line, 10);
    assert!(hit.exception.is_none());
}

#[test]
fn conditional_breakpoint_silently_continues_until_condition_holds() {
    let fx = fixture();
    fx.session
        .set_breakpoint(&bp_at(17, Some("hitCount % 10 == 0")))
        .unwrap();
    fx.session.attach(PID, None).unwrap();

    let mut pauses = 0;
    for pass in 1..=15 {
        let decision = fx.script.fire_breakpoint(1, fx.main_method, 16).unwrap();
        match decision {
            ResumeDecision::RemainPaused => {
                pauses += 1;
                assert_eq!(pass, 10, "only the tenth pass should break");
                fx.session.continue_run().unwrap();
            }
            ResumeDecision::Resume => {}
        }
    }
    assert_eq!(pauses, 1);

    let WaitOutcome::Hit(hit) = fx.session.wait_for_hit(WAIT, None).unwrap() else {
        panic!("expected the tenth hit");
    };
    assert_eq!(hit.hit_count, 10);

    // Hits 11-15 were filtered; nothing else is queued.
    assert!(matches!(
        fx.session.wait_for_hit(SHORT_WAIT, None).unwrap(),
        WaitOutcome::Timeout
    ));

    // The hit count keeps advancing even for filtered passes.
    assert_eq!(fx.session.list_breakpoints()[0].hit_count, 15);
}

#[test]
fn disabled_breakpoint_does_not_break() {
    let fx = fixture();
    let bp = fx.session.set_breakpoint(&bp_at(10, None)).unwrap();
    fx.session.attach(PID, None).unwrap();
    fx.session.set_breakpoint_enabled(&bp.id, false).unwrap();

    // The native breakpoint is deactivated, so the runtime never calls
    // back.
    assert!(fx.script.fire_breakpoint(1, fx.main_method, 0).is_none());

    fx.session.set_breakpoint_enabled(&bp.id, true).unwrap();
    assert_eq!(
        fx.script.fire_breakpoint(1, fx.main_method, 0),
        Some(ResumeDecision::RemainPaused)
    );
}

#[test]
fn remove_and_clear_release_native_handles() {
    let fx = fixture();
    let bp = fx.session.set_breakpoint(&bp_at(10, None)).unwrap();
    fx.session.set_breakpoint(&bp_at(11, None)).unwrap();
    fx.session.attach(PID, None).unwrap();
    assert_eq!(fx.script.counters().breakpoints_created(), 2);

    fx.session.remove_breakpoint(&bp.id).unwrap();
    assert_eq!(fx.script.counters().breakpoints_released(), 1);

    fx.session.clear_all_breakpoints();
    assert_eq!(fx.script.counters().breakpoints_released(), 2);
    assert_eq!(fx.script.leaked_native_breakpoints(), 0);
    assert!(fx.session.list_breakpoints().is_empty());

    assert!(matches!(
        fx.session.remove_breakpoint("bp-404"),
        Err(DebugError::BreakpointNotFound(_))
    ));
}

#[test]
fn set_set_list_yields_one_entry() {
    let fx = fixture();
    fx.session.set_breakpoint(&bp_at(10, None)).unwrap();
    fx.session.set_breakpoint(&bp_at(10, None)).unwrap();
    let listed = fx.session.list_breakpoints();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].location.line, 10);

    // Re-setting with a different condition updates in place.
    let updated = fx
        .session
        .set_breakpoint(&bp_at(10, Some("hitCount > 1")))
        .unwrap();
    assert_eq!(updated.id, listed[0].id);
    assert_eq!(fx.session.list_breakpoints().len(), 1);
}

#[test]
fn set_remove_list_is_empty() {
    let fx = fixture();
    let bp = fx.session.set_breakpoint(&bp_at(10, None)).unwrap();
    fx.session.remove_breakpoint(&bp.id).unwrap();
    assert!(fx.session.list_breakpoints().is_empty());
}

#[test]
fn hits_for_one_breakpoint_dequeue_in_hit_order() {
    let fx = fixture();
    fx.session.set_breakpoint(&bp_at(10, None)).unwrap();
    fx.session.attach(PID, None).unwrap();

    for _ in 0..3 {
        fx.script.fire_breakpoint(1, fx.main_method, 0).unwrap();
        fx.session.continue_run().unwrap();
    }

    for expected in 1..=3u64 {
        let WaitOutcome::Hit(hit) = fx.session.wait_for_hit(WAIT, None).unwrap() else {
            panic!("expected hit {expected}");
        };
        assert_eq!(hit.hit_count, expected);
    }
}

#[test]
fn filtered_wait_matches_requested_breakpoint() {
    let fx = fixture();
    let first = fx.session.set_breakpoint(&bp_at(10, None)).unwrap();
    let second = fx.session.set_breakpoint(&bp_at(11, None)).unwrap();
    fx.session.attach(PID, None).unwrap();

    fx.script.fire_breakpoint(1, fx.main_method, 0).unwrap();
    fx.session.continue_run().unwrap();
    fx.script.fire_breakpoint(1, fx.main_method, 8).unwrap();

    let WaitOutcome::Hit(hit) = fx.session.wait_for_hit(WAIT, Some(&second.id)).unwrap() else {
        panic!("expected the second breakpoint's hit");
    };
    assert_eq!(hit.breakpoint_id, second.id);

    // The first hit is still queued for the next waiter.
    let WaitOutcome::Hit(hit) = fx.session.wait_for_hit(WAIT, None).unwrap() else {
        panic!("expected the first breakpoint's hit");
    };
    assert_eq!(hit.breakpoint_id, first.id);
}

// ----- scenario 3: exception breakpoints -----------------------------

#[test]
fn exception_subtype_rule_matches_derived_type() {
    let fx = fixture();
    fx.session
        .set_exception_breakpoint(&ExceptionBreakpointRequest {
            exception_type: "System.ArgumentException".into(),
            break_on_first_chance: true,
            break_on_second_chance: false,
            include_subtypes: true,
        })
        .unwrap();
    fx.session.attach(PID, None).unwrap();

    let decision =
        fx.script
            .throw_exception(1, "System.ArgumentNullException", "value was null", true);
    assert_eq!(decision, ResumeDecision::RemainPaused);

    let WaitOutcome::Hit(hit) = fx.session.wait_for_hit(WAIT, None).unwrap() else {
        panic!("expected an exception hit");
    };
    let info = hit.exception.unwrap();
    assert_eq!(info.exception_type, "System.ArgumentNullException");
    assert!(info.is_first_chance);
    assert_eq!(fx.session.snapshot().pause_reason, Some(PauseReason::Exception));
}

#[test]
fn unmatched_exception_resumes() {
    let fx = fixture();
    fx.session
        .set_exception_breakpoint(&ExceptionBreakpointRequest {
            exception_type: "System.IO.IOException".into(),
            break_on_first_chance: true,
            break_on_second_chance: true,
            include_subtypes: false,
        })
        .unwrap();
    fx.session.attach(PID, None).unwrap();

    let decision = fx.script.throw_exception(1, "System.TimeoutException", "slow", true);
    assert_eq!(decision, ResumeDecision::Resume);
    assert_eq!(fx.session.snapshot().state, SessionState::Running);
}

// ----- stepping ------------------------------------------------------

#[test]
fn step_blocks_until_completion_and_reports_location() {
    let fx = fixture();
    fx.session.set_breakpoint(&bp_at(10, None)).unwrap();
    fx.session.attach(PID, None).unwrap();
    fx.script
        .with_world(|world| {
            let path = fx.module_path.clone();
            let method = fx.main_method;
            world.set_step_frame(1, managed_frame("App.Program.Main", "App", &path, method, 8));
        });

    fx.script.fire_breakpoint(1, fx.main_method, 0).unwrap();
    let location = fx.session.step(StepMode::Over, None, Some(WAIT)).unwrap();
    assert_eq!(location.unwrap().line, 11);

    let snapshot = fx.session.snapshot();
    assert_eq!(snapshot.state, SessionState::Paused);
    assert_eq!(snapshot.pause_reason, Some(PauseReason::Step));
}

#[test]
fn step_requires_paused() {
    let fx = fixture();
    fx.session.attach(PID, None).unwrap();
    assert!(matches!(
        fx.session.step(StepMode::In, None, None),
        Err(DebugError::NotPaused)
    ));
}

// ----- scenario 4: member access with inherited property -------------

/// World where thread 1 frame 0 has `this` of type `App.Person`
/// deriving `Core.Entity` (a different module), with `Home` resolved
/// via backing field and `Id` via a base-type getter.
fn person_fixture() -> Fixture {
    let fx = fixture();
    fx.script.with_world(|world| {
        let app = TypeRef {
            module_path: "/app/App.dll".into(),
            token: 0x0200_0010,
        };
        let entity = TypeRef {
            module_path: "/core/Core.dll".into(),
            token: 0x0200_0002,
        };
        let address_type = TypeRef {
            module_path: "/app/App.dll".into(),
            token: 0x0200_0011,
        };
        world.define_type("App.Person", app.clone(), Some(entity.clone()));
        world.define_type("Core.Entity", entity.clone(), None);
        world.define_type("App.Address", address_type.clone(), None);
        world.define_getter(&entity, "Id", Ok(ScriptedWorld::int_value(7)));

        let home = world.add_object("App.Address", 0x2000, 32, Some(address_type));
        world.add_field(&home, None, "City", 8, 8, false, ScriptedWorld::string_value("Oslo"));

        let person = world.add_object("App.Person", 0x1000, 48, Some(app.clone()));
        world.add_field(
            &person,
            Some(app),
            "<Home>k__BackingField",
            8,
            8,
            false,
            home,
        );
        world.set_this(1, 0, person);
    });
    fx.session.attach(PID, None).unwrap();
    fx.session.pause().unwrap();
    fx
}

#[test]
fn evaluate_walks_members_and_base_types() {
    let fx = person_fixture();

    let city = fx.session.evaluate("this.Home.City", None, None, None).unwrap();
    assert_eq!(city.value, "\"Oslo\"");
    assert_eq!(city.type_name, "System.String");

    // Found on Core.Entity via the base-type walk, through its getter.
    let id = fx.session.evaluate("this.Id", None, None, None).unwrap();
    assert_eq!(id.value, "7");
    assert_eq!(id.type_name, "System.Int32");

    let err = fx
        .session
        .evaluate("this.Home.NoSuchMember", None, None, None)
        .unwrap_err();
    let DebugError::MemberNotFound {
        segment,
        receiver_type,
    } = err
    else {
        panic!("expected member-not-found");
    };
    assert_eq!(segment, "NoSuchMember");
    assert_eq!(receiver_type, "App.Address");
}

#[test]
fn evaluate_reports_null_segment() {
    let fx = person_fixture();
    fx.script.with_world(|world| {
        world.set_locals(
            1,
            0,
            vec![("order".into(), ScriptedWorld::null_value("App.Order"))],
        );
    });
    let err = fx
        .session
        .evaluate("order.Total", None, None, None)
        .unwrap_err();
    assert!(matches!(err, DebugError::NullReference(path) if path == "order"));
}

#[test]
fn evaluate_requires_paused() {
    let fx = fixture();
    fx.session.attach(PID, None).unwrap();
    assert!(matches!(
        fx.session.evaluate("this", None, None, None),
        Err(DebugError::NotPaused)
    ));
}

#[test]
fn variables_lists_scopes_in_order() {
    let fx = person_fixture();
    fx.script.with_world(|world| {
        world.set_locals(1, 0, vec![("count".into(), ScriptedWorld::int_value(3))]);
        world.set_arguments(1, 0, vec![("input".into(), ScriptedWorld::string_value("hi"))]);
    });

    let variables = fx.session.variables(None, None, ScopeFilter::All).unwrap();
    let names: Vec<&str> = variables.iter().map(|v| v.name.as_str()).collect();
    assert_eq!(names, ["input", "count", "this"]);
    assert_eq!(variables[1].value, "3");
    assert!(variables[2].has_children);
}

#[test]
fn object_inspection_detects_cycles() {
    let fx = fixture();
    fx.script.with_world(|world| {
        let node_type = TypeRef {
            module_path: "/app/App.dll".into(),
            token: 0x0200_0020,
        };
        world.define_type("App.Node", node_type.clone(), None);
        let a = world.add_object("App.Node", 0x3000, 24, Some(node_type.clone()));
        let b = world.add_object("App.Node", 0x3100, 24, Some(node_type));
        world.add_field(&a, None, "Next", 8, 8, false, b.clone());
        world.add_field(&b, None, "Next", 8, 8, false, a.clone());
        world.set_locals(1, 0, vec![("head".into(), a)]);
    });
    fx.session.attach(PID, None).unwrap();
    fx.session.pause().unwrap();

    let inspection = fx
        .session
        .inspect_object("head", Some(5), None, None)
        .unwrap();
    assert!(!inspection.is_null);
    assert!(inspection.has_circular_ref);
    assert_eq!(inspection.fields.len(), 1);
    // Depth 5 requested, but the cycle stops the walk early.
    let next = &inspection.fields[0];
    assert_eq!(next.name, "Next");
    assert!(next.has_children);

    assert!(matches!(
        fx.session.inspect_object("head", Some(11), None, None),
        Err(DebugError::DepthExceeded { requested: 11, max: 10 })
    ));
}

// ----- scenario 5: memory --------------------------------------------

#[test]
fn memory_read_partial_is_success_with_note() {
    let fx = fixture();
    fx.script
        .with_world(|world| world.add_memory(0x1000, (0u8..100).collect()));
    fx.session.attach(PID, None).unwrap();
    fx.session.pause().unwrap();

    let region = fx.session.read_memory("0x1020", Some(8192)).unwrap();
    assert_eq!(region.requested_size, 8192);
    assert_eq!(region.actual_size, 68);
    assert!(region.error.as_deref().unwrap().contains("truncated"));
    assert!(region.hex.starts_with("20 21 22"));

    let err = fx.session.read_memory("0x1000", Some(100_000)).unwrap_err();
    assert!(matches!(
        err,
        DebugError::SizeExceeded {
            requested: 100_000,
            max: 65536
        }
    ));

    let err = fx.session.read_memory("0x9999999", None).unwrap_err();
    assert!(matches!(err, DebugError::InvalidAddress(_)));
}

#[test]
fn layout_reports_padding_and_header() {
    let fx = fixture();
    fx.script.with_world(|world| {
        let point = TypeRef {
            module_path: "/app/App.dll".into(),
            token: 0x0200_0030,
        };
        world.define_type("App.Widget", point.clone(), None);
        world.set_type_layout(
            &point,
            RawTypeLayout {
                type_name: "App.Widget".into(),
                total_size: 40,
                is_value_type: false,
                base: None,
                base_name: Some("System.Object".into()),
                fields: vec![
                    RawLayoutField::instance("Flag", "System.Boolean", 0, 1, false),
                    RawLayoutField::instance("Count", "System.Int64", 8, 8, false),
                    RawLayoutField::instance("Name", "System.String", 16, 8, true),
                ],
            },
        );
    });
    fx.session.attach(PID, None).unwrap();
    fx.session.pause().unwrap();

    let layout = fx
        .session
        .get_layout("App.Widget", false, true, None, None)
        .unwrap();
    assert_eq!(layout.total_size, 40);
    assert_eq!(layout.header_size, 16);
    assert_eq!(layout.data_size, 24);
    assert!(!layout.is_value_type);
    assert_eq!(layout.base_type.as_deref(), Some("System.Object"));
    assert_eq!(layout.fields.len(), 3);
    assert_eq!(layout.padding_regions.len(), 1);
    assert_eq!(layout.padding_regions[0].offset, 1);
    assert_eq!(layout.padding_regions[0].size, 7);
    assert!(layout.fields[2].is_reference);

    assert!(matches!(
        fx.session.get_layout("App.Missing", false, false, None, None),
        Err(DebugError::TypeNotFound(_))
    ));
}

#[test]
fn references_enumerate_outbound_only() {
    let fx = fixture();
    fx.script.with_world(|world| {
        let person = TypeRef {
            module_path: "/app/App.dll".into(),
            token: 0x0200_0040,
        };
        world.define_type("App.Person", person.clone(), None);
        let home = world.add_object("App.Address", 0x5000, 32, None);
        let tags = world.add_array(
            "System.String",
            0x5100,
            vec![ScriptedWorld::string_value("a")],
        );
        let owner = world.add_object("App.Person", 0x4000, 48, Some(person));
        world.add_field(&owner, None, "Home", 8, 8, false, home);
        world.add_field(&owner, None, "Tags", 16, 8, false, tags);
        world.add_field(&owner, None, "Age", 24, 4, false, ScriptedWorld::int_value(44));
        world.set_locals(1, 0, vec![("owner".into(), owner)]);
    });
    fx.session.attach(PID, None).unwrap();
    fx.session.pause().unwrap();

    let outbound = fx
        .session
        .get_references("owner", ReferenceDirection::Outbound, None, true, None, None)
        .unwrap();
    assert_eq!(outbound.references.len(), 2);
    assert!(outbound
        .references
        .iter()
        .all(|edge| edge.kind == ReferenceKind::Field && edge.source_address == 0x4000));

    let inbound = fx
        .session
        .get_references("owner", ReferenceDirection::Inbound, None, true, None, None)
        .unwrap();
    assert!(inbound.references.is_empty());
    assert!(inbound.note.unwrap().contains("not implemented"));
}

// ----- stack and threads ---------------------------------------------

#[test]
fn stack_walk_reports_totals_and_external_frames() {
    let fx = fixture();
    fx.script.with_world(|world| {
        let path = fx.module_path.clone();
        let method = fx.main_method;
        world.add_thread(
            2,
            Some("Worker"),
            vec![
                managed_frame("App.Worker.Run", "App", &path, method, 16),
                native_frame("ntdll!RtlUserThreadStart"),
            ],
        );
    });
    fx.session.attach(PID, None).unwrap();
    fx.session.pause().unwrap();

    let slice = fx.session.stack(Some(2), 0, None, false).unwrap();
    assert_eq!(slice.total_frames, 2);
    assert_eq!(slice.frames.len(), 2);
    assert_eq!(slice.frames[0].location.as_ref().unwrap().line, 17);
    assert!(!slice.frames[0].is_external);
    assert!(slice.frames[1].is_external);
    assert!(slice.frames[1].location.is_none());

    assert!(matches!(
        fx.session.stack(Some(77), 0, None, false),
        Err(DebugError::InvalidThread(77))
    ));
}

#[test]
fn threads_mark_the_paused_thread_current() {
    let fx = fixture();
    fx.session.set_breakpoint(&bp_at(10, None)).unwrap();
    fx.session.attach(PID, None).unwrap();
    fx.script.fire_breakpoint(1, fx.main_method, 0).unwrap();

    let threads = fx.session.threads().unwrap();
    assert_eq!(threads.len(), 1);
    assert!(threads[0].is_current);
    assert_eq!(threads[0].location.as_ref().unwrap().line, 10);
}

// ----- module inspector ----------------------------------------------

fn metadata_fixture() -> Fixture {
    let fx = fixture();
    fx.script.with_world(|world| {
        let module = world.module_named("App").unwrap();
        let types = vec![
            RawTypeInfo {
                token: 0x0200_0001,
                namespace: "App.Orders".into(),
                name: "OrderService".into(),
                kind: TypeKind::Class,
                visibility: Visibility::Public,
                is_abstract: false,
                is_sealed: true,
                generic_arity: 0,
            },
            RawTypeInfo {
                token: 0x0200_0002,
                namespace: "App.Orders".into(),
                name: "OrderState".into(),
                kind: TypeKind::Enum,
                visibility: Visibility::Public,
                is_abstract: false,
                is_sealed: false,
                generic_arity: 0,
            },
            RawTypeInfo {
                token: 0x0200_0003,
                namespace: "App.Internal".into(),
                name: "Cache".into(),
                kind: TypeKind::Class,
                visibility: Visibility::Internal,
                is_abstract: false,
                is_sealed: false,
                generic_arity: 1,
            },
        ];
        world.set_module_types(&module, types);
    });
    fx.session.attach(PID, None).unwrap();
    fx
}

#[test]
fn types_list_filters_and_paginates() {
    let fx = metadata_fixture();

    let all = fx
        .session
        .list_types("App", &TypeQuery::default())
        .unwrap();
    assert_eq!(all.total, 3);
    assert_eq!(all.namespaces, vec!["App.Internal", "App.Orders"]);
    assert!(all.continuation.is_none());

    let page = fx
        .session
        .list_types(
            "App",
            &TypeQuery {
                max_results: Some(2),
                ..TypeQuery::default()
            },
        )
        .unwrap();
    assert_eq!(page.types.len(), 2);
    let token = page.continuation.unwrap();
    let rest = fx
        .session
        .list_types(
            "App",
            &TypeQuery {
                max_results: Some(2),
                continuation: Some(token),
                ..TypeQuery::default()
            },
        )
        .unwrap();
    assert_eq!(rest.types.len(), 1);
    assert!(rest.continuation.is_none());

    let enums = fx
        .session
        .list_types(
            "App",
            &TypeQuery {
                kind: Some(TypeKind::Enum),
                ..TypeQuery::default()
            },
        )
        .unwrap();
    assert_eq!(enums.types.len(), 1);
    assert_eq!(enums.types[0].name, "OrderState");

    assert!(matches!(
        fx.session.list_types("Nope", &TypeQuery::default()),
        Err(DebugError::ModuleNotFound(_))
    ));
}

#[test]
fn search_matches_wildcards_across_modules() {
    let fx = metadata_fixture();

    let results = fx
        .session
        .search("Order*", SearchKind::Types, None, false, None)
        .unwrap();
    assert_eq!(results.types.len(), 2);
    assert!(!results.truncated);

    let results = fx
        .session
        .search("*service", SearchKind::Types, None, false, None)
        .unwrap();
    assert_eq!(results.types.len(), 1);
    assert_eq!(results.types[0].full_name, "App.Orders.OrderService");

    // Case-sensitive search misses the lowercase pattern.
    let results = fx
        .session
        .search("*service", SearchKind::Types, None, true, None)
        .unwrap();
    assert!(results.types.is_empty());

    assert!(matches!(
        fx.session.search("  ", SearchKind::Both, None, false, None),
        Err(DebugError::InvalidPattern(_))
    ));
}

#[test]
fn members_merge_base_types_when_inherited() {
    let fx = metadata_fixture();
    fx.script.with_world(|world| {
        let service = TypeRef {
            module_path: "/app/App.dll".into(),
            token: 0x0200_0001,
        };
        let base = TypeRef {
            module_path: "/core/Core.dll".into(),
            token: 0x0200_0050,
        };
        world.define_type("App.Orders.OrderService", service.clone(), Some(base.clone()));
        world.set_type_members(
            &service,
            crate::types::MemberList {
                methods: vec![MethodEntry {
                    name: "Submit".into(),
                    signature: "void Submit(Order order)".into(),
                    return_type: "System.Void".into(),
                    parameters: Vec::new(),
                    visibility: Visibility::Public,
                    is_static: false,
                    is_virtual: false,
                    is_abstract: false,
                    is_generic: false,
                }],
                fields: vec![FieldEntry {
                    name: "_count".into(),
                    type_name: "System.Int32".into(),
                    visibility: Visibility::Private,
                    is_static: false,
                    is_literal: false,
                }],
                ..crate::types::MemberList::default()
            },
        );
        world.set_type_members(
            &base,
            crate::types::MemberList {
                methods: vec![MethodEntry {
                    name: "Validate".into(),
                    signature: "bool Validate()".into(),
                    return_type: "System.Boolean".into(),
                    parameters: Vec::new(),
                    visibility: Visibility::Protected,
                    is_static: false,
                    is_virtual: true,
                    is_abstract: false,
                    is_generic: false,
                }],
                ..crate::types::MemberList::default()
            },
        );
    });

    let own = fx
        .session
        .get_members("App.Orders.OrderService", &MemberQuery::default())
        .unwrap();
    assert_eq!(own.methods.len(), 1);
    assert_eq!(own.fields.len(), 1);

    let inherited = fx
        .session
        .get_members(
            "App.Orders.OrderService",
            &MemberQuery {
                include_inherited: true,
                ..MemberQuery::default()
            },
        )
        .unwrap();
    let names: Vec<&str> = inherited.methods.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, ["Submit", "Validate"]);

    // Visibility filter drops the protected base method.
    let public_only = fx
        .session
        .get_members(
            "App.Orders.OrderService",
            &MemberQuery {
                include_inherited: true,
                visibility: Some(Visibility::Public),
                ..MemberQuery::default()
            },
        )
        .unwrap();
    assert_eq!(public_only.methods.len(), 1);
    assert!(public_only.fields.is_empty());

    assert!(matches!(
        fx.session.get_members("App.Missing", &MemberQuery::default()),
        Err(DebugError::TypeNotFound(_))
    ));
}

// ----- scenario 6: reattach loop -------------------------------------

#[test]
fn reattach_loop_releases_everything() {
    let fx = fixture();
    fx.session.set_breakpoint(&bp_at(10, None)).unwrap();

    for cycle in 0..10 {
        fx.session.attach(PID, None).unwrap();
        assert_eq!(
            fx.session.list_breakpoints()[0].state,
            BreakpointState::Bound,
            "cycle {cycle}"
        );
        fx.session.disconnect(false).unwrap();
        assert_eq!(
            fx.session.list_breakpoints()[0].state,
            BreakpointState::Pending,
            "cycle {cycle}"
        );
    }

    let counters = fx.script.counters();
    assert_eq!(counters.connects(), 10);
    assert_eq!(counters.runtimes_dropped(), 10);
    assert_eq!(counters.detaches(), 10);
    assert_eq!(counters.breakpoints_created(), 10);
    assert_eq!(counters.breakpoints_released(), 10);
    assert_eq!(fx.script.leaked_native_breakpoints(), 0);
}

#[test]
fn teardown_cancels_waiters_and_discards_hits() {
    let fx = fixture();
    fx.session.set_breakpoint(&bp_at(10, None)).unwrap();
    fx.session.attach(PID, None).unwrap();
    fx.script.fire_breakpoint(1, fx.main_method, 0).unwrap();
    assert_eq!(fx.session.pending_hits(), 1);

    fx.session.disconnect(true).unwrap();
    assert_eq!(fx.session.pending_hits(), 0);
    assert_eq!(fx.script.counters().terminates(), 1);
    assert!(matches!(
        fx.session.wait_for_hit(SHORT_WAIT, None),
        Err(DebugError::NoSession)
    ));
}
