//! Scoped acquisition and teardown of fixtures.

#![expect(
    clippy::expect_used,
    reason = "test code uses expect for clarity and assertions"
)]

mod support;

use std::sync::Arc;
use std::time::Duration;

use esfixture::{
    FixtureError, FixtureScope, HealthStatus, ProcessState, RunnerSettings, VersionCache,
    elasticsearch, elasticsearch_proc,
};
use esfixture_config::SettingsLayer;

use support::{FakeInstallation, fake_installation, quick_launch};

fn runner(installation: &FakeInstallation) -> RunnerSettings {
    RunnerSettings::new(
        SettingsLayer::default().with_logsdir(installation.logsdir()),
        SettingsLayer::default(),
    )
    .with_launch_options(quick_launch())
}

fn scope_for(installation: &FakeInstallation) -> FixtureScope {
    let mut scope = FixtureScope::new(runner(installation), Arc::new(VersionCache::new()));
    scope
        .register(elasticsearch_proc(
            "elasticsearch_proc",
            installation.executable(),
        ))
        .expect("register fixture");
    scope
}

#[test]
fn process_is_reused_within_a_scope() {
    let installation = fake_installation("6.2.3");
    let mut scope = scope_for(&installation);

    let first = scope.process("elasticsearch_proc").expect("first acquisition");
    let second = scope.process("elasticsearch_proc").expect("second acquisition");

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.pid(), second.pid());
    assert_eq!(first.port(), second.port());
    scope.close();
}

#[cfg(unix)]
#[test]
fn closing_the_scope_stops_every_process() {
    let installation = fake_installation("2.4.6");
    let mut scope = scope_for(&installation);
    scope
        .register(elasticsearch_proc("second_proc", installation.executable()))
        .expect("register second fixture");
    let first = scope.process("elasticsearch_proc").expect("first");
    let second = scope.process("second_proc").expect("second");
    let pids = [
        first.pid().expect("first pid"),
        second.pid().expect("second pid"),
    ];
    assert_ne!(first.port(), second.port());

    scope.close();

    assert!(!first.running());
    assert!(!second.running());
    assert!(pids.iter().all(|pid| !support::process_exists(*pid)));
}

#[cfg(unix)]
#[test]
fn dropping_the_scope_stops_processes() {
    let installation = fake_installation("5.6.7");
    let mut scope = scope_for(&installation);
    let process = scope.process("elasticsearch_proc").expect("acquire");
    let pid = process.pid().expect("pid");

    drop(scope);

    assert!(!process.running());
    assert!(!support::process_exists(pid));
}

#[test]
fn client_fixture_reports_green_health() {
    let installation = fake_installation("6.2.3");
    let mut scope = scope_for(&installation);
    let fixture = elasticsearch("elasticsearch_proc");

    let client = scope.client(&fixture).expect("client");
    let again = scope.client(&fixture).expect("cached client");

    assert!(Arc::ptr_eq(&client, &again));
    assert_eq!(
        client.cluster_health().expect("health").status,
        HealthStatus::Green
    );
    scope.close();
    assert!(!client.process().running());
}

#[test]
fn client_fixture_restarts_a_stopped_process() {
    let installation = fake_installation("1.5.2");
    let mut scope = scope_for(&installation);
    let process = scope.process("elasticsearch_proc").expect("acquire");
    process.stop().expect("stop");

    let client = scope
        .client(&elasticsearch("elasticsearch_proc"))
        .expect("client restarts the process");

    assert!(process.running());
    assert!(client.info().is_ok());
    scope.close();
}

#[test]
fn client_fixture_follows_a_restarted_process() {
    let installation = fake_installation("6.2.3");
    let mut scope = scope_for(&installation);
    let fixture = elasticsearch("elasticsearch_proc");
    let first = scope.client(&fixture).expect("first client");
    let process = Arc::clone(first.process());

    process.stop().expect("stop");
    let second = scope.client(&fixture).expect("client after restart");

    assert!(process.running());
    assert_eq!(Some(second.base_url().clone()), process.base_url());
    assert_eq!(
        second.cluster_health().expect("health").status,
        HealthStatus::Green
    );
    scope.close();
}

#[cfg(unix)]
#[test]
fn crashed_server_is_relaunched_by_start() {
    let installation = fake_installation("5.6.7");
    let mut scope = scope_for(&installation);
    let process = scope.process("elasticsearch_proc").expect("acquire");
    let crashed = process.pid().expect("pid");

    support::send_signal(crashed, nix::sys::signal::Signal::SIGKILL);
    assert!(support::eventually(Duration::from_secs(10), || {
        !process.running()
    }));
    process.start().expect("relaunch");

    assert_eq!(process.state(), ProcessState::Healthy);
    assert!(process.running());
    assert_ne!(process.pid(), Some(crashed));
    assert!(!support::process_exists(crashed));
    scope.close();
}

#[cfg(unix)]
#[test]
fn client_fixture_recovers_from_a_crashed_server() {
    let installation = fake_installation("2.4.6");
    let mut scope = scope_for(&installation);
    let fixture = elasticsearch("elasticsearch_proc");
    let first = scope.client(&fixture).expect("first client");
    let crashed = first.process().pid().expect("pid");

    support::send_signal(crashed, nix::sys::signal::Signal::SIGKILL);
    assert!(support::eventually(Duration::from_secs(10), || {
        !first.process().running()
    }));
    let second = scope.client(&fixture).expect("client after crash");

    assert_ne!(second.process().pid(), Some(crashed));
    assert_eq!(Some(second.base_url().clone()), second.process().base_url());
    assert!(second.info().is_ok());
    scope.close();
}

#[test]
fn call_site_settings_beat_runner_settings() {
    let installation = fake_installation("6.2.3");
    let runner = RunnerSettings::new(
        SettingsLayer::default()
            .with_logsdir(installation.logsdir())
            .with_cluster_name("from-option"),
        SettingsLayer::default().with_cluster_name("from-project"),
    )
    .with_launch_options(quick_launch());
    let mut scope = FixtureScope::new(runner, Arc::new(VersionCache::new()));
    scope
        .register(
            elasticsearch_proc("elasticsearch_proc", installation.executable())
                .with_settings(SettingsLayer::default().with_cluster_name("from-call-site")),
        )
        .expect("register");

    let client = scope
        .client(&elasticsearch("elasticsearch_proc"))
        .expect("client");

    assert_eq!(
        client.cluster_health().expect("health").cluster_name,
        "from-call-site"
    );
    scope.close();
}

#[test]
fn unknown_and_duplicate_fixtures_are_rejected() {
    let installation = fake_installation("6.2.3");
    let mut scope = scope_for(&installation);

    let duplicate = scope.register(elasticsearch_proc(
        "elasticsearch_proc",
        installation.executable(),
    ));
    let unknown = scope.process("missing_proc");

    assert!(matches!(
        duplicate,
        Err(FixtureError::DuplicateFixture { ref name }) if name == "elasticsearch_proc"
    ));
    assert!(matches!(
        unknown,
        Err(FixtureError::UnknownFixture { ref name }) if name == "missing_proc"
    ));
}

#[test]
fn version_cache_is_shared_between_scopes() {
    let installation = fake_installation("5.6.7");
    let versions = Arc::new(VersionCache::new());
    let mut first = FixtureScope::new(runner(&installation), Arc::clone(&versions));
    let mut second = FixtureScope::new(runner(&installation), Arc::clone(&versions));
    for scope in [&mut first, &mut second] {
        scope
            .register(elasticsearch_proc(
                "elasticsearch_proc",
                installation.executable(),
            ))
            .expect("register");
    }

    let a = first.process("elasticsearch_proc").expect("first scope");
    let b = second.process("elasticsearch_proc").expect("second scope");

    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(a.version(), b.version());
    assert_eq!(versions.len(), 1);
    first.close();
    second.close();
}
