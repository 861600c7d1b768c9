//! Load / unload / list workflows with the RT loop running.

use super::common::{POLL_INTERVAL, RtThread, Spy, SpyCalls, WAIT_LIMIT, add_spy, manager};
use evo_common::config::{ConfigLoader, ManagerConfig};
use evo_common::controller::LifecycleState;
use evo_controller_manager::controllers::register_builtin_controllers;
use evo_controller_manager::{
    ControlManager, ControllerTypeRegistry, ManagerError, Strictness, SwitchRequest,
};
use std::io::Write;
use std::sync::Arc;
use std::thread;
use tempfile::NamedTempFile;

fn names(manager: &ControlManager) -> Vec<String> {
    manager.list_controllers().into_iter().map(|c| c.name).collect()
}

#[test]
fn load_list_unload_while_rt_runs() {
    let manager = manager();
    let rt = RtThread::start(&manager);

    let info = manager.load_controller("hb1", "heartbeat").unwrap();
    assert_eq!(info.type_name, "heartbeat");
    assert_eq!(info.state, LifecycleState::Unconfigured);
    manager.load_controller("hb2", "heartbeat").unwrap();
    let calls = Arc::new(SpyCalls::default());
    add_spy(&manager, Spy::new("spy", &calls));
    assert_eq!(names(&manager), vec!["hb1", "hb2", "spy"]);

    manager.unload_controller("spy").unwrap();
    assert_eq!(SpyCalls::get(&calls.shutdown), 1);
    manager.unload_controller("hb1").unwrap();
    assert_eq!(names(&manager), vec!["hb2"]);

    assert!(matches!(
        manager.unload_controller("hb1"),
        Err(ManagerError::ControllerNotFound(_))
    ));
    assert!(rt.stop().cycle_count > 0);
}

#[test]
fn failed_loads_leave_list_unchanged() {
    let manager = manager();
    let rt = RtThread::start(&manager);
    manager.load_controller("hb", "heartbeat").unwrap();

    assert!(matches!(
        manager.load_controller("hb", "heartbeat"),
        Err(ManagerError::DuplicateName(_))
    ));
    let calls = Arc::new(SpyCalls::default());
    assert!(matches!(
        manager.add_controller("hb", "spy", Box::new(Spy::new("hb", &calls))),
        Err(ManagerError::DuplicateName(_))
    ));
    // The rejected instance is dropped without being registered.
    assert_eq!(SpyCalls::get(&calls.shutdown), 0);
    assert!(matches!(
        manager.load_controller("other", "no_such_type"),
        Err(ManagerError::PluginLoad { .. })
    ));
    assert!(matches!(
        manager.load_configured_controller("other"),
        Err(ManagerError::UnknownControllerType(_))
    ));

    assert_eq!(names(&manager), vec!["hb"]);
    rt.stop();
}

#[test]
fn configured_controllers_load_and_autostart() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[shared]
service_name = "cm-test"
log_level = "debug"

[manager]
update_rate_hz = 1000
switch_poll_interval_us = 20
switch_timeout_ms = 500

[[controllers]]
name = "beat_fast"
type = "heartbeat"
autostart = true

[[controllers]]
name = "beat_spare"
type = "heartbeat"
"#
    )
    .unwrap();

    let config = ManagerConfig::load(file.path()).unwrap();
    let mut types = ControllerTypeRegistry::new();
    register_builtin_controllers(&mut types);
    let manager = Arc::new(ControlManager::from_config(&config, Box::new(types)).unwrap());
    assert_eq!(manager.poll_interval(), POLL_INTERVAL);
    assert_eq!(manager.list_controller_types(), vec!["heartbeat"]);

    for entry in &config.controllers {
        manager.load_configured_controller(&entry.name).unwrap();
    }
    let rt = RtThread::start(&manager);

    manager
        .switch_controller(
            SwitchRequest::new()
                .with_start(config.autostart_controllers())
                .with_strictness(Strictness::Strict),
        )
        .unwrap();
    let report = manager.wait_for_switch(WAIT_LIMIT).expect("switch finished");
    report.outcome().unwrap();

    assert_eq!(manager.controller_state("beat_fast").unwrap(), LifecycleState::Active);
    assert_eq!(manager.controller_state("beat_spare").unwrap(), LifecycleState::Unconfigured);
    assert!(matches!(
        manager.unload_controller("beat_fast"),
        Err(ManagerError::ControllerActive(_))
    ));
    manager.unload_controller("beat_spare").unwrap();
    rt.stop();
}

#[test]
fn concurrent_management_threads_are_serialized() {
    let manager = manager();
    let rt = RtThread::start(&manager);

    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                for round in 0..25 {
                    let name = format!("w{worker}_{round}");
                    manager.load_controller(&name, "heartbeat").unwrap();
                    assert!(manager.list_controllers().iter().any(|c| c.name == name));
                    manager.unload_controller(&name).unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert!(manager.list_controllers().is_empty());
    rt.stop();
}
