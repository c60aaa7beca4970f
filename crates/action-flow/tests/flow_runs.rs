mod common;

use std::sync::Arc;
use std::time::Duration;

use action_flow::{ProgressEvent, ProgressReporter, RunOutcome, RunSupervisor};
use common::*;
use flow_model::{
    FilePayload, Flow, RestartLimit, RunSettings, SelectDropdownStep, SelectFilesStep, Step,
    WaitForEmailCodeStep,
};
use flowpilot_core_types::{BranchName, ExecutionPath, StepStatus};
use flowpilot_state_center::VariableStore;
use tokio::sync::broadcast::Receiver;
use tokio::time::Instant;

fn drain(rx: &mut Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn resets(events: &[ProgressEvent]) -> Vec<u64> {
    events
        .iter()
        .filter_map(|event| match event {
            ProgressEvent::FlowReset { iteration, .. } => Some(*iteration),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn bounded_restart_runs_flow_twice() {
    let surface = ScriptedSurface::new().with("#a").with("#b");
    let supervisor = supervisor();
    let mut rx = supervisor.reporter().subscribe();
    let flow = Flow::new(
        "twice",
        vec![click("#a"), click("#b"), restart(RestartLimit::Times(1))],
    );

    let report = supervisor.start(flow, surface.clone()).unwrap().wait().await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.iteration, 2);
    assert_eq!(surface.clicks(), vec!["#a", "#b", "#a", "#b"]);
    let events = drain(&mut rx);
    assert_eq!(resets(&events), vec![1]);
    assert!(matches!(
        events.last(),
        Some(ProgressEvent::FlowCompleted { iteration: 2 })
    ));
}

#[tokio::test(start_paused = true)]
async fn unlimited_restart_stops_once_condition_flips() {
    let surface = ScriptedSurface::new()
        .with("#done")
        .answer("#gate", &[false, false, true]);
    let supervisor = supervisor();
    let mut rx = supervisor.reporter().subscribe();
    let flow = Flow::new(
        "poll",
        vec![if_exists(
            "#gate",
            0,
            vec![click("#done")],
            vec![restart(RestartLimit::Unlimited)],
        )],
    );

    let report = supervisor.start(flow, surface.clone()).unwrap().wait().await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.iteration, 3);
    assert_eq!(surface.clicks(), vec!["#done"]);
    assert_eq!(resets(&drain(&mut rx)), vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn polling_restarts_are_spaced_by_step_delay() {
    let mut gate = vec![false; 50];
    gate.push(true);
    let surface = ScriptedSurface::new().with("#done").answer("#gate", &gate);
    let supervisor = supervisor().with_settings(RunSettings {
        step_delay_ms: 300,
        ..RunSettings::default()
    });
    let flow = Flow::new(
        "wait for slot",
        vec![if_exists(
            "#gate",
            0,
            vec![click("#done")],
            vec![restart(RestartLimit::Unlimited)],
        )],
    );

    let started = Instant::now();
    let report = supervisor.start(flow, surface.clone()).unwrap().wait().await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.iteration, 51);
    assert!(started.elapsed() >= Duration::from_millis(50 * 300));
}

#[tokio::test(start_paused = true)]
async fn stop_during_restart_pause_aborts() {
    let surface = ScriptedSurface::new().answer("#gate", &[false; 8]);
    let supervisor = Arc::new(supervisor().with_settings(RunSettings {
        step_delay_ms: 10_000,
        ..RunSettings::default()
    }));
    let flow = Flow::new(
        "slow poll",
        vec![if_exists(
            "#gate",
            0,
            vec![],
            vec![restart(RestartLimit::Unlimited)],
        )],
    );

    let handle = supervisor.start(flow, surface).unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(supervisor.request_stop());
    let report = handle.wait().await;

    assert_eq!(report.outcome, RunOutcome::Aborted);
    assert_eq!(report.iteration, 1);
}

#[tokio::test(start_paused = true)]
async fn if_mode_restart_resumes_at_conditional() {
    let surface = ScriptedSurface::new()
        .with("#setup")
        .with("#go")
        .answer("#ready", &[false, true]);
    let flow = Flow::new(
        "resume",
        vec![
            click("#setup"),
            if_exists(
                "#ready",
                0,
                vec![click("#go")],
                vec![restart_to_if(RestartLimit::Times(3), 1)],
            ),
        ],
    );

    let report = supervisor().start(flow, surface.clone()).unwrap().wait().await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(surface.clicks(), vec!["#setup", "#go"]);
    assert_eq!(report.iteration, 2);
}

#[tokio::test(start_paused = true)]
async fn if_mode_restart_without_conditional_jumps_to_top() {
    let surface = ScriptedSurface::new().with("#a");
    let flow = Flow::new(
        "fallback jump",
        vec![click("#a"), restart_to_if(RestartLimit::Times(1), 0)],
    );

    let report = supervisor().start(flow, surface.clone()).unwrap().wait().await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(surface.clicks(), vec!["#a", "#a"]);
}

#[tokio::test(start_paused = true)]
async fn missing_click_target_fails_the_run() {
    let surface = ScriptedSurface::new().with("#b");
    let supervisor = supervisor();
    let flow = Flow::new("broken", vec![click("#missing"), click("#b")]);

    let report = supervisor.start(flow, surface.clone()).unwrap().wait().await;

    assert_eq!(report.outcome, RunOutcome::Failed);
    let failure = report.last_error.clone().expect("failure recorded");
    assert_eq!(failure.path, ExecutionPath::top(0));
    assert_eq!(failure.error, "selector_not_found");
    assert_eq!(report.status(&ExecutionPath::top(0)), StepStatus::Error);
    assert_eq!(report.status(&ExecutionPath::top(1)), StepStatus::Pending);
    assert!(surface.clicks().is_empty());

    let mirror = supervisor.query_state().mirror;
    assert_eq!(mirror.outcome, Some(RunOutcome::Failed));
    assert_eq!(
        mirror.last_error.map(|err| (err.path, err.error)),
        Some(("0".to_string(), "selector_not_found".to_string()))
    );
    assert_eq!(
        mirror.messages.get("0").map(String::as_str),
        Some("selector_not_found")
    );
}

#[tokio::test(start_paused = true)]
async fn nested_steps_report_distinct_paths() {
    let surface = ScriptedSurface::new()
        .with("#gate")
        .with("#a")
        .with("#b")
        .with("#c");
    let supervisor = supervisor();
    let flow = Flow::new(
        "nested",
        vec![
            if_exists("#gate", 0, vec![click("#a"), click("#b")], vec![]),
            click("#c"),
        ],
    );

    let report = supervisor.start(flow, surface).unwrap().wait().await;

    let first = ExecutionPath::top(0);
    assert_eq!(report.outcome, RunOutcome::Completed);
    for path in [
        first.clone(),
        first.child(BranchName::Then, 0),
        first.child(BranchName::Then, 1),
        ExecutionPath::top(1),
    ] {
        assert_eq!(report.status(&path), StepStatus::Success, "{path}");
    }

    let mirror = supervisor.query_state().mirror;
    let keys: Vec<&str> = mirror.statuses.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["0", "0.then.0", "0.then.1", "1"]);
    assert_eq!(mirror.branch(&first), Some(BranchName::Then));
}

#[tokio::test(start_paused = true)]
async fn branch_failure_lets_outer_flow_continue() {
    let surface = ScriptedSurface::new()
        .with("#gate")
        .with("#skipped")
        .with("#after");
    let flow = Flow::new(
        "tolerant",
        vec![
            if_exists(
                "#gate",
                0,
                vec![click("#missing"), click("#skipped")],
                vec![],
            ),
            click("#after"),
        ],
    );

    let report = supervisor().start(flow, surface.clone()).unwrap().wait().await;

    let first = ExecutionPath::top(0);
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.status(&first), StepStatus::Success);
    assert_eq!(
        report.status(&first.child(BranchName::Then, 0)),
        StepStatus::Error
    );
    assert_eq!(
        report.status(&first.child(BranchName::Then, 1)),
        StepStatus::Idle
    );
    assert_eq!(surface.clicks(), vec!["#after"]);
}

#[tokio::test(start_paused = true)]
async fn forbidden_urls_are_rejected_before_navigation() {
    let surface = ScriptedSurface::new().with("#a");
    let flow = Flow::new("settings", vec![goto("chrome://settings"), click("#a")]);

    let report = supervisor().start(flow, surface.clone()).unwrap().wait().await;

    assert_eq!(report.outcome, RunOutcome::Failed);
    assert_eq!(
        report.last_error.map(|failure| failure.error),
        Some("non_scriptable_target".to_string())
    );
    assert!(surface.log().is_empty());
}

#[tokio::test(start_paused = true)]
async fn redirect_to_forbidden_page_fails_after_load() {
    let surface = ScriptedSurface::new()
        .with("#a")
        .redirect("https://store.test/", "https://chromewebstore.google.com/detail/x");
    let flow = Flow::new("store", vec![goto("https://store.test/"), click("#a")]);

    let report = supervisor().start(flow, surface.clone()).unwrap().wait().await;

    assert_eq!(report.outcome, RunOutcome::Failed);
    assert_eq!(
        report.last_error.map(|failure| failure.error),
        Some("non_scriptable_target".to_string())
    );
    assert_eq!(surface.log(), vec!["navigate https://store.test/"]);
}

#[tokio::test(start_paused = true)]
async fn navigation_reattaches_executor_before_actions() {
    let surface = ScriptedSurface::new().with("#a");
    let flow = Flow::new("visit", vec![goto("https://example.com/"), click("#a")]);

    let report = supervisor().start(flow, surface.clone()).unwrap().wait().await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(
        surface.log(),
        vec!["navigate https://example.com/", "attach", "click #a"]
    );
}

#[tokio::test(start_paused = true)]
async fn wait_counts_down_whole_seconds() {
    let surface = ScriptedSurface::new();
    let supervisor = supervisor();
    let mut rx = supervisor.reporter().subscribe();

    let report = supervisor
        .start(Flow::new("pause", vec![wait(2_500)]), surface)
        .unwrap()
        .wait()
        .await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    let seconds: Vec<u64> = drain(&mut rx)
        .into_iter()
        .filter_map(|event| match event {
            ProgressEvent::WaitCountdown {
                seconds_remaining, ..
            } => Some(seconds_remaining),
            _ => None,
        })
        .collect();
    assert_eq!(seconds, vec![3, 2, 1, 0]);
}

#[tokio::test(start_paused = true)]
async fn email_code_feeds_later_fill() {
    let surface = ScriptedSurface::new().with("#otp");
    let variables = Arc::new(VariableStore::in_memory());
    let supervisor = RunSupervisor::new(ProgressReporter::detached(), variables.clone())
        .with_settings(quick_settings())
        .with_code_source(Arc::new(FixedCode("481516")));
    let flow = Flow::new(
        "login",
        vec![
            Step::WaitForEmailCode(WaitForEmailCodeStep {
                subject: "Your sign-in code".into(),
                timeout_ms: 60_000,
                poll_ms: 5_000,
                variable: "otp".into(),
            }),
            fill("#otp", "code: {{otp}}"),
        ],
    );

    let report = supervisor.start(flow, surface.clone()).unwrap().wait().await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(variables.get("otp").as_deref(), Some("481516"));
    assert!(surface.log().contains(&"fill #otp=code: 481516".to_string()));
}

#[tokio::test(start_paused = true)]
async fn missing_mailbox_fails_code_step() {
    let surface = ScriptedSurface::new();
    let flow = Flow::new(
        "login",
        vec![Step::WaitForEmailCode(WaitForEmailCodeStep {
            subject: "code".into(),
            timeout_ms: 1_000,
            poll_ms: 100,
            variable: "otp".into(),
        })],
    );

    let report = supervisor().start(flow, surface).unwrap().wait().await;

    assert_eq!(report.outcome, RunOutcome::Failed);
    let error = report.last_error.map(|failure| failure.error).unwrap();
    assert!(error.starts_with("mailbox_unavailable"), "{error}");
}

#[tokio::test(start_paused = true)]
async fn dropdown_and_file_steps_reach_the_page() {
    let surface = ScriptedSurface::new()
        .with("#country")
        .with("#upload")
        .with("#go");
    let flow = Flow::new(
        "forms",
        vec![
            Step::SelectDropdown(SelectDropdownStep {
                control_selector: "#country".into(),
                option_text: "Norway".into(),
                option_item_selector: None,
                timeout_ms: 2_000,
            }),
            Step::SelectFiles(SelectFilesStep {
                selector: "#upload".into(),
                files: vec![FilePayload {
                    name: "cv.txt".into(),
                    mime: "text/plain".into(),
                    size: 2,
                    data_url: "data:text/plain;base64,aGk=".into(),
                }],
            }),
            click("#go"),
        ],
    );

    let report = supervisor().start(flow, surface.clone()).unwrap().wait().await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    let actions: Vec<String> = surface
        .log()
        .into_iter()
        .filter(|line| line != "attach")
        .collect();
    assert_eq!(
        actions,
        vec!["SelectDropdown #country", "SelectFiles #upload", "click #go"]
    );
}
