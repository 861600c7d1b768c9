//! Switch sequencing against a running RT loop.

use super::common::{
    POLL_INTERVAL, RT_PERIOD, RtThread, Spy, SpyCalls, WAIT_LIMIT, add_spy, event_log, manager,
};
use evo_common::controller::LifecycleState;
use evo_controller_manager::{
    ManagerError, SkipReason, SkippedController, Strictness, SwitchRequest, SwitchStatus,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Allowance for thread wake-up latency on a loaded test machine.
const SCHED_SLACK: Duration = Duration::from_millis(50);

#[test]
fn strict_switch_with_unknown_name_changes_nothing() {
    let manager = manager();
    let calls = Arc::new(SpyCalls::default());
    add_spy(&manager, Spy::new("a", &calls));
    let rt = RtThread::start(&manager);

    let request = SwitchRequest::new()
        .with_start(["a", "ghost"])
        .with_strictness(Strictness::Strict);
    match manager.switch_controller(request) {
        Err(ManagerError::UnknownController(names)) => assert_eq!(names, vec!["ghost"]),
        other => panic!("expected UnknownController, got {other:?}"),
    }

    std::thread::sleep(Duration::from_millis(5));
    assert_eq!(manager.switch_status(), SwitchStatus::Idle);
    assert_eq!(calls.lifecycle_total(), 0);
    assert_eq!(SpyCalls::get(&calls.update), 0);
    assert_eq!(manager.controller_state("a").unwrap(), LifecycleState::Unconfigured);
    rt.stop();
}

#[test]
fn best_effort_switch_starts_known_and_skips_unknown() {
    let manager = manager();
    let calls = Arc::new(SpyCalls::default());
    add_spy(&manager, Spy::new("a", &calls));
    let rt = RtThread::start(&manager);

    let accepted = manager
        .switch_controller(SwitchRequest::new().with_start(["a", "ghost"]))
        .unwrap();
    assert_eq!(accepted.start, vec!["a"]);
    assert_eq!(
        accepted.skipped,
        vec![SkippedController {
            name: "ghost".to_string(),
            reason: SkipReason::Unknown
        }]
    );

    let report = manager.wait_for_switch(WAIT_LIMIT).expect("switch finished");
    assert!(report.is_success());
    assert_eq!(report.started, vec!["a"]);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(manager.controller_state("a").unwrap(), LifecycleState::Active);
    assert_eq!(SpyCalls::get(&calls.configure), 1);
    assert_eq!(SpyCalls::get(&calls.activate), 1);

    rt.stop();
    assert!(SpyCalls::get(&calls.update) > 0);
}

#[test]
fn stop_and_start_run_on_consecutive_cycles() {
    let manager = manager();
    let events = event_log();
    let calls = Arc::new(SpyCalls::default());
    add_spy(
        &manager,
        Spy::new("a", &calls).claiming("joint1/position").logging_to(&events, false),
    );
    add_spy(
        &manager,
        Spy::new("b", &calls).claiming("joint1/position").logging_to(&events, false),
    );
    add_spy(&manager, Spy::new("ticker", &calls).logging_to(&events, true));
    let rt = RtThread::start(&manager);

    manager
        .switch_controller(
            SwitchRequest::new()
                .with_start(["a", "ticker"])
                .with_strictness(Strictness::Strict)
                .with_start_asap(true),
        )
        .unwrap();
    assert!(manager.wait_for_switch(WAIT_LIMIT).unwrap().is_success());

    // b would share joint1/position with the active a.
    let conflicting = SwitchRequest::new()
        .with_start(["b"])
        .with_strictness(Strictness::Strict);
    assert!(matches!(
        manager.switch_controller(conflicting),
        Err(ManagerError::ResourceConflict { ref holder, .. }) if holder == "a"
    ));

    events.lock().unwrap().clear();
    let handover = SwitchRequest::new()
        .with_stop(["a"])
        .with_start(["b"])
        .with_strictness(Strictness::Strict);
    manager.switch_controller(handover).unwrap();
    let report = manager.wait_for_switch(WAIT_LIMIT).expect("switch finished");
    assert!(report.is_success());
    assert_eq!(report.stopped, vec!["a"]);
    assert_eq!(report.started, vec!["b"]);
    rt.stop();

    let log = events.lock().unwrap().clone();
    let position = |event: &str| log.iter().position(|e| e == event).unwrap();
    let stopped = position("a:deactivate");
    let started = position("b:activate");
    assert!(stopped < started);
    let ticks_between = log[stopped..started]
        .iter()
        .filter(|e| e.as_str() == "ticker:update")
        .count();
    assert_eq!(ticks_between, 1, "log: {log:?}");

    let states: Vec<(String, LifecycleState)> = manager
        .list_controllers()
        .into_iter()
        .map(|c| (c.name, c.state))
        .collect();
    assert_eq!(
        states,
        vec![
            ("a".to_string(), LifecycleState::Inactive),
            ("b".to_string(), LifecycleState::Active),
            ("ticker".to_string(), LifecycleState::Active),
        ]
    );
}

#[test]
fn timed_out_switch_returns_to_idle() {
    let manager = manager();
    let slow_calls = Arc::new(SpyCalls::default());
    let next_calls = Arc::new(SpyCalls::default());
    add_spy(
        &manager,
        Spy::new("slow", &slow_calls).stalling_deactivate(Duration::from_millis(100)),
    );
    add_spy(&manager, Spy::new("next", &next_calls));
    let rt = RtThread::start(&manager);

    manager
        .switch_controller(SwitchRequest::new().with_start(["slow"]))
        .unwrap();
    assert!(manager.wait_for_switch(WAIT_LIMIT).unwrap().is_success());

    let stall = Duration::from_millis(100);
    let timeout = Duration::from_millis(20);
    let issued = Instant::now();
    manager
        .switch_controller(
            SwitchRequest::new()
                .with_stop(["slow"])
                .with_start(["next"])
                .with_timeout(timeout),
        )
        .unwrap();
    let report = manager.wait_for_switch(WAIT_LIMIT).expect("switch finished");
    let idle_after = issued.elapsed();

    // The stalled deactivate cannot be interrupted; the timeout is reported
    // as soon as it returns.
    let bound = stall + RT_PERIOD + POLL_INTERVAL + SCHED_SLACK;
    match report.outcome() {
        Err(ManagerError::SwitchTimeout { elapsed }) => {
            assert!(elapsed > timeout, "elapsed {elapsed:?}");
            assert!(elapsed < bound, "elapsed {elapsed:?}");
        }
        other => panic!("expected SwitchTimeout, got {other:?}"),
    }
    assert!(idle_after < bound, "idle after {idle_after:?}");
    assert!(report.not_attempted.contains(&"next".to_string()));
    assert_eq!(SpyCalls::get(&next_calls.activate), 0);
    assert_eq!(manager.switch_status(), SwitchStatus::Idle);

    // The coordinator accepts new work right away.
    manager
        .switch_controller(SwitchRequest::new().with_start(["next"]))
        .unwrap();
    assert!(manager.wait_for_switch(WAIT_LIMIT).unwrap().is_success());
    assert_eq!(manager.controller_state("next").unwrap(), LifecycleState::Active);
    rt.stop();
}

#[test]
fn unload_after_uncollected_switch_shuts_controller_down() {
    let manager = manager();
    let calls = Arc::new(SpyCalls::default());
    add_spy(&manager, Spy::new("a", &calls));
    let rt = RtThread::start(&manager);

    manager
        .switch_controller(SwitchRequest::new().with_start(["a"]))
        .unwrap();
    assert!(manager.wait_for_switch(WAIT_LIMIT).unwrap().is_success());

    // Stop without collecting the report.
    manager
        .switch_controller(SwitchRequest::new().with_stop(["a"]))
        .unwrap();
    let deadline = Instant::now() + WAIT_LIMIT;
    let unloaded = loop {
        match manager.unload_controller("a") {
            Err(ManagerError::ControllerActive(_) | ManagerError::SwitchPending)
                if Instant::now() < deadline =>
            {
                std::thread::sleep(Duration::from_millis(1));
            }
            other => break other,
        }
    };
    unloaded.unwrap();

    assert!(manager.list_controllers().is_empty());
    assert_eq!(SpyCalls::get(&calls.shutdown), 1);
    match manager.switch_status() {
        SwitchStatus::Finished(report) => assert_eq!(report.stopped, vec!["a"]),
        other => panic!("expected the stop report, got {other:?}"),
    }
    rt.stop();
}

#[test]
fn second_switch_is_rejected_while_first_is_pending() {
    let manager = manager();
    let calls = Arc::new(SpyCalls::default());
    add_spy(&manager, Spy::new("a", &calls));
    add_spy(&manager, Spy::new("b", &calls));

    // No RT loop yet: the first switch stays staged.
    manager
        .switch_controller(SwitchRequest::new().with_start(["a"]))
        .unwrap();
    assert!(matches!(
        manager.switch_status(),
        SwitchStatus::Pending(_)
    ));
    assert!(matches!(
        manager.switch_controller(SwitchRequest::new().with_start(["b"])),
        Err(ManagerError::SwitchPending)
    ));
    assert!(matches!(
        manager.unload_controller("a"),
        Err(ManagerError::ControllerActive(_))
    ));

    let rt = RtThread::start(&manager);
    let report = manager.wait_for_switch(WAIT_LIMIT).expect("switch finished");
    assert_eq!(report.started, vec!["a"]);
    assert_eq!(manager.controller_state("b").unwrap(), LifecycleState::Unconfigured);

    manager
        .switch_controller(SwitchRequest::new().with_stop(["a"]))
        .unwrap();
    assert!(manager.wait_for_switch(WAIT_LIMIT).unwrap().is_success());
    manager.unload_controller("a").unwrap();
    assert_eq!(SpyCalls::get(&calls.shutdown), 1);
    rt.stop();
}
