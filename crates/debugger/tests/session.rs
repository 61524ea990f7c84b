//! Session behaviour against the scripted backend

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use debugger::testing::{Call, FakeBackend};
use debugger::{
    CompileUnit, DebugSession, Event, Location, NodeId, ProcessState, SessionError,
    SessionOptions,
};
use tempfile::TempDir;

#[ctor::ctor]
fn init() {
    let in_ci = std::env::var("CI")
        .map(|val| val == "true")
        .unwrap_or(false);

    if std::io::IsTerminal::is_terminal(&std::io::stderr()) || in_ci {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .json()
            .try_init();
    }
    let _ = color_eyre::install();
}

/// A project on disk: an executable and `src/main.cpp` with 20 lines
struct Project {
    dir: TempDir,
}

impl Project {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        let source: String = (1..=20).map(|i| format!("int line{i};\n")).collect();
        std::fs::write(dir.path().join("src/main.cpp"), source).unwrap();
        std::fs::write(dir.path().join("app"), b"\x7fELF").unwrap();
        Self { dir }
    }

    fn executable(&self) -> PathBuf {
        self.dir.path().join("app")
    }

    fn source_dir(&self) -> PathBuf {
        self.dir.path().join("src")
    }

    fn main_cpp(&self) -> PathBuf {
        self.source_dir().join("main.cpp")
    }

    fn backend(&self) -> FakeBackend {
        FakeBackend::new().with_compile_unit(self.source_dir(), "main.cpp")
    }
}

fn options() -> SessionOptions {
    SessionOptions {
        poll_interval: Duration::from_millis(5),
        ..SessionOptions::default()
    }
}

fn session(project: &Project, backend: FakeBackend) -> (DebugSession, Arc<FakeBackend>) {
    let backend = Arc::new(backend);
    let session = DebugSession::new(backend.clone(), options());
    session.set_target(project.executable()).unwrap();
    (session, backend)
}

fn main_node(session: &DebugSession, project: &Project) -> NodeId {
    session
        .with_tree(|tree| tree.find_by_path(project.main_cpp()))
        .unwrap()
        .unwrap()
}

fn wait_for_state(session: &DebugSession, state: ProcessState) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while session.state() != state {
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {state:?}, last state {:?}",
            session.state()
        );
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn set_target_indexes_compile_units() {
    let project = Project::new();
    let backend = project
        .backend()
        .with_raw_compile_unit(CompileUnit {
            directory: None,
            filename: Some("orphan.c".to_string()),
        })
        .with_compile_unit(project.source_dir(), "deleted.c");
    let (session, _backend) = session(&project, backend);

    let leaves = session
        .with_tree(|tree| {
            tree.leaves()
                .into_iter()
                .map(|id| tree.path(id))
                .collect::<Vec<_>>()
        })
        .unwrap();
    assert_eq!(
        leaves,
        vec![project.source_dir().join("deleted.c"), project.main_cpp()]
    );
    assert_eq!(
        session.missing_files(),
        vec![project.source_dir().join("deleted.c")]
    );
    assert_eq!(session.state(), ProcessState::NotLaunched);
    assert_eq!(
        session.target().unwrap().source_root,
        debugger::utils::find_source_root(&project.executable())
    );
}

#[test]
fn add_then_remove_restores_the_ledger() {
    let project = Project::new();
    let (session, backend) = session(&project, project.backend());
    let node = main_node(&session, &project);

    let id = session.add_breakpoint(node, 4).unwrap();
    assert!(session.has_breakpoint(node, 4));
    assert_eq!(
        backend.breakpoints(),
        vec![(id, Location::new(project.main_cpp(), 5))]
    );
    let records = session.breakpoints();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].location, Location::new(project.main_cpp(), 5));

    session.remove_breakpoint(node, 4).unwrap();
    assert!(!session.has_breakpoint(node, 4));
    assert!(session.breakpoints().is_empty());
    assert!(backend.breakpoints().is_empty());
}

#[test]
fn add_remove_add_ends_with_the_breakpoint_set() {
    let project = Project::new();
    let (session, backend) = session(&project, project.backend());
    let node = main_node(&session, &project);

    let first = session.add_breakpoint(node, 7).unwrap();
    session.remove_breakpoint(node, 7).unwrap();
    let second = session.add_breakpoint(node, 7).unwrap();

    assert_ne!(first, second);
    assert!(session.has_breakpoint(node, 7));
    assert_eq!(session.breakpoints().len(), 1);
    assert_eq!(
        backend.breakpoints(),
        vec![(second, Location::new(project.main_cpp(), 8))]
    );
}

#[test]
fn duplicate_add_and_missing_remove_leave_the_ledger_alone() {
    let project = Project::new();
    let (session, backend) = session(&project, project.backend());
    let node = main_node(&session, &project);

    session.add_breakpoint(node, 0).unwrap();
    let before = session.breakpoints();

    let err = session.add_breakpoint(node, 0).unwrap_err();
    assert!(matches!(err, SessionError::Validation(_)), "{err:?}");
    let err = session.remove_breakpoint(node, 1).unwrap_err();
    assert!(matches!(err, SessionError::NotFound(_)), "{err:?}");

    assert_eq!(session.breakpoints(), before);
    assert_eq!(backend.breakpoints().len(), 1);
}

#[test]
fn out_of_range_lines_are_rejected() {
    let project = Project::new();
    let (session, backend) = session(&project, project.backend());
    let node = main_node(&session, &project);

    let err = session.add_breakpoint(node, 20).unwrap_err();
    assert!(matches!(err, SessionError::Validation(_)), "{err:?}");
    let err = session.exec_command("b main.cpp:21").unwrap_err();
    assert!(matches!(err, SessionError::Validation(_)), "{err:?}");
    assert!(backend.breakpoints().is_empty());
}

#[test]
fn breakpoints_in_missing_files_are_not_found() {
    let project = Project::new();
    let backend = project.backend().with_compile_unit(project.source_dir(), "gone.c");
    let (session, _backend) = session(&project, backend);
    let node = session
        .with_tree(|tree| tree.find_by_filename("gone.c"))
        .unwrap()
        .unwrap();

    let err = session.add_breakpoint(node, 0).unwrap_err();
    assert!(matches!(err, SessionError::NotFound(_)), "{err:?}");
    assert!(session.missing_files().contains(&project.source_dir().join("gone.c")));
}

#[test]
fn break_run_continue() {
    let project = Project::new();
    let (session, backend) = session(&project, project.backend());
    let events = session.events();
    let node = main_node(&session, &project);

    session.exec_command("b main.cpp:10").unwrap();
    assert!(session.has_breakpoint(node, 9));

    session.exec_command("r").unwrap();
    let received: Vec<Event> = (0..2)
        .map(|_| events.recv_timeout(Duration::from_secs(5)).unwrap())
        .collect();
    assert_eq!(
        received,
        vec![Event::SwitchToFile(project.main_cpp()), Event::LoadFile(node)]
    );
    assert_eq!(session.state(), ProcessState::Stopped);
    assert_eq!(
        session.active_location(),
        Some(Location::new(project.main_cpp(), 10))
    );
    assert!(session.is_active_line(node, 9));
    assert!(!session.is_active_line(node, 8));

    session.exec_command("c").unwrap();
    wait_for_state(&session, ProcessState::Exited);
    assert_eq!(session.active_location(), None);

    let calls = backend.calls();
    assert!(matches!(calls.last(), Some(Call::Continue)), "{calls:?}");
    assert!(calls.iter().any(|call| matches!(call, Call::Launch(_))));
}

#[test]
fn switch_requests_wait_for_the_file_to_open() {
    let project = Project::new();
    let (session, _backend) = session(&project, project.backend());
    let node = main_node(&session, &project);

    assert_eq!(session.request_switch(&project.main_cpp()).unwrap(), node);
    // not shown yet
    assert_eq!(session.take_switch().unwrap(), None);

    session.open_file(node).unwrap();
    assert_eq!(session.take_switch().unwrap(), Some(node));
    assert_eq!(session.take_switch().unwrap(), None);

    let err = session
        .request_switch(&project.source_dir().join("absent.cpp"))
        .unwrap_err();
    assert!(matches!(err, SessionError::NotFound(_)), "{err:?}");
}

#[test]
fn stepping_keeps_the_process_stopped() {
    let project = Project::new();
    let (session, backend) = session(&project, project.backend());
    session.exec_command("b main.cpp:3").unwrap();
    session.exec_command("r").unwrap();
    wait_for_state(&session, ProcessState::Stopped);

    session.exec_command("s").unwrap();
    session.exec_command("n").unwrap_or_else(|e| {
        // the step may still be reported as running
        assert!(matches!(e, SessionError::NotStopped), "{e:?}");
    });
    wait_for_state(&session, ProcessState::Stopped);
    assert!(backend.calls().contains(&Call::StepInto));
}

#[test]
fn symbol_breakpoints_resolve_through_the_tree() {
    let project = Project::new();
    let backend = project
        .backend()
        .with_symbol("main", project.main_cpp(), 2)
        // debug info built elsewhere: only the file name matches
        .with_symbol("helper", "/build/other/main.cpp", 7)
        .with_symbol("lost", "/elsewhere/lost.c", 1);
    let (session, _backend) = session(&project, backend);
    let node = main_node(&session, &project);

    session.exec_command("b main").unwrap();
    session.exec_command("b helper").unwrap();
    assert!(session.has_breakpoint(node, 1));
    assert!(session.has_breakpoint(node, 6));

    let err = session.exec_command("b lost").unwrap_err();
    assert!(matches!(err, SessionError::NotFound(_)), "{err:?}");
    let err = session.exec_command("b nothing").unwrap_err();
    assert!(matches!(err, SessionError::NotFound(_)), "{err:?}");
}

#[test]
fn symbols_declared_in_headers_break_at_the_definition() {
    let project = Project::new();
    let backend = project
        .backend()
        // the prototype's header is not a compile unit of the target
        .with_symbol("helper", project.dir.path().join("include/util.h"), 1)
        .with_symbol("helper", project.main_cpp(), 12);
    let (session, backend) = session(&project, backend);
    let node = main_node(&session, &project);

    session.exec_command("b helper").unwrap();

    assert!(session.has_breakpoint(node, 11));
    assert_eq!(
        backend
            .breakpoints()
            .into_iter()
            .map(|(_, location)| location)
            .collect::<Vec<_>>(),
        vec![Location::new(project.main_cpp(), 12)]
    );
}

#[test]
fn controls_require_a_stopped_process() {
    let project = Project::new();
    let (session, backend) = session(&project, project.backend());

    for command in ["c", "s", "n"] {
        let err = session.exec_command(command).unwrap_err();
        assert!(matches!(err, SessionError::NotStopped), "{command}: {err:?}");
    }
    assert!(matches!(session.r#continue(), Err(SessionError::NotStopped)));
    assert!(
        !backend
            .calls()
            .iter()
            .any(|call| matches!(call, Call::Continue | Call::StepInto | Call::StepOver))
    );
}

#[test]
fn invalid_commands_are_parse_errors() {
    let project = Project::new();
    let (session, backend) = session(&project, project.backend());
    let calls = backend.calls().len();

    let err = session.exec_command("frobnicate now").unwrap_err();
    assert_eq!(err.to_string(), "frobnicate now not valid");
    let err = session.exec_command("b").unwrap_err();
    assert!(matches!(err, SessionError::Parse(_)), "{err:?}");
    session.exec_command("   ").unwrap();

    assert_eq!(backend.calls().len(), calls);
    assert_eq!(session.state(), ProcessState::NotLaunched);
}

#[test]
fn launch_needs_an_existing_program() {
    let backend = Arc::new(FakeBackend::new());
    let session = DebugSession::new(backend.clone(), options());
    assert!(matches!(
        session.launch_target(),
        Err(SessionError::Validation(_))
    ));

    session.set_target("/nonexistent/program").unwrap();
    assert!(matches!(
        session.launch_target(),
        Err(SessionError::NotFound(_))
    ));
    assert!(!backend.calls().iter().any(|call| matches!(call, Call::Launch(_))));
}

#[test]
fn failed_launch_leaves_the_session_usable() {
    let project = Project::new();
    let (session, _backend) = session(&project, project.backend().failing_launch("no such adapter"));

    let err = session.launch_target().unwrap_err();
    assert!(matches!(err, SessionError::Backend(_)), "{err:?}");
    assert!(err.to_string().contains("no such adapter"));
    assert_eq!(session.state(), ProcessState::NotLaunched);
    session.exec_command("b main.cpp:1").unwrap();
}

#[test]
fn launch_is_rejected_while_running() {
    let project = Project::new();
    let (session, _backend) = session(&project, project.backend().holding_after_launch());

    session.launch_target().unwrap();
    wait_for_state(&session, ProcessState::Running);
    assert!(matches!(
        session.launch_target(),
        Err(SessionError::InvalidState(_))
    ));
}

#[test]
fn relaunch_after_exit_uses_fresh_redirect_files() {
    let project = Project::new();
    let (session, backend) = session(&project, project.backend());

    session.launch_target().unwrap();
    wait_for_state(&session, ProcessState::Exited);
    session.launch_target().unwrap();
    wait_for_state(&session, ProcessState::Exited);

    let launches: Vec<_> = backend
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            Call::Launch(request) => Some(request),
            _ => None,
        })
        .collect();
    assert_eq!(launches.len(), 2);
    assert_ne!(launches[0].stdio, launches[1].stdio);
    assert!(!Path::new(&launches[0].stdio.stdout).exists());
}

#[test]
fn process_output_reaches_the_ui_exactly_once() {
    let project = Project::new();
    let backend = project.backend().with_output(b"hello\n", b"warning\n");
    let (session, _backend) = session(&project, backend);
    let events = session.events();

    session.launch_target().unwrap();
    wait_for_state(&session, ProcessState::Exited);
    // the event thread finishes its final drain after reporting the exit
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut relayed = String::new();
    while relayed.len() < "hello\nwarning\n".len() && Instant::now() < deadline {
        if let Ok(Event::Io(text)) = events.recv_timeout(Duration::from_millis(50)) {
            relayed.push_str(&text);
        }
    }
    assert_eq!(relayed, "hello\nwarning\n");
    assert!(events.recv_timeout(Duration::from_millis(50)).is_err());
    assert_eq!(session.console(), "hello\nwarning\n");
}

#[test]
fn dropping_the_session_kills_and_unblocks_the_event_thread() {
    let project = Project::new();
    let (session, backend) = session(&project, project.backend().holding_after_launch());
    session.launch_target().unwrap();
    wait_for_state(&session, ProcessState::Running);

    let started = Instant::now();
    drop(session);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(backend.calls().contains(&Call::Kill));
}

#[test]
fn published_events_reach_the_ui_in_order() {
    let project = Project::new();
    let (session, _backend) = session(&project, project.backend());
    let events = session.events();

    session.publish(Event::StepOver);
    session.publish(Event::Continue);
    assert_eq!(events.try_iter().collect::<Vec<_>>(), vec![Event::StepOver, Event::Continue]);
}
