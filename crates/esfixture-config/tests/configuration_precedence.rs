//! Configuration precedence across layers.

use std::cell::RefCell;
use std::ffi::OsString;
use std::fs;

use esfixture_config::{Config, EffectiveConfig, SettingsLayer, default_logsdir, resolve};
use ortho_config::OrthoConfig;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use tempfile::TempDir;

struct Harness {
    temp_dir: TempDir,
    cli_args: RefCell<Vec<OsString>>,
    call_site: RefCell<SettingsLayer>,
    option: RefCell<SettingsLayer>,
    resolved: RefCell<Option<EffectiveConfig>>,
    error: RefCell<Option<String>>,
}

impl Harness {
    fn new() -> Self {
        let temp_dir = match TempDir::new() {
            Ok(dir) => dir,
            Err(error) => panic!("failed to create temporary directory: {error}"),
        };
        Self {
            temp_dir,
            cli_args: RefCell::new(vec![OsString::from("esfixture")]),
            call_site: RefCell::new(SettingsLayer::default()),
            option: RefCell::new(SettingsLayer::default()),
            resolved: RefCell::new(None),
            error: RefCell::new(None),
        }
    }

    fn write_project_file(&self, contents: &str) {
        let path = self.temp_dir.path().join("esfixture.toml");
        if let Err(error) = fs::write(&path, contents) {
            panic!("failed to write project configuration: {error}");
        }
        let mut args = self.cli_args.borrow_mut();
        args.push(OsString::from("--config-path"));
        args.push(path.into_os_string());
    }

    fn resolve(&self) {
        if self.resolved.borrow().is_some() || self.error.borrow().is_some() {
            return;
        }

        let args = self.cli_args.borrow().clone();
        match Config::load_from_iter(args) {
            Ok(project) => {
                let resolved = resolve(
                    &self.call_site.borrow(),
                    &self.option.borrow(),
                    &project.settings_layer(),
                );
                *self.resolved.borrow_mut() = Some(resolved);
            }
            Err(error) => {
                *self.error.borrow_mut() = Some(error.to_string());
            }
        }
    }

    fn config(&self) -> EffectiveConfig {
        self.resolve();
        if let Some(error) = self.error.borrow().as_ref() {
            panic!("configuration failed to load: {error}");
        }
        match self.resolved.borrow().as_ref() {
            Some(config) => config.clone(),
            None => panic!("configuration was not resolved"),
        }
    }
}

#[fixture]
fn harness() -> Harness {
    Harness::new()
}

#[given("a project file setting the logs directory to \"{dir}\"")]
fn given_project_logsdir(harness: &Harness, dir: String) {
    harness.write_project_file(&format!("logsdir = \"{dir}\"\n"));
}

#[given("the runner option sets the logs directory to \"{dir}\"")]
fn given_option_logsdir(harness: &Harness, dir: String) {
    let layer = harness.option.borrow().clone().with_logsdir(dir);
    *harness.option.borrow_mut() = layer;
}

#[given("the call site sets the logs directory to \"{dir}\"")]
fn given_call_site_logsdir(harness: &Harness, dir: String) {
    let layer = harness.call_site.borrow().clone().with_logsdir(dir);
    *harness.call_site.borrow_mut() = layer;
}

#[given("the call site pins port {port}")]
fn given_call_site_port(harness: &Harness, port: u16) {
    let layer = harness.call_site.borrow().clone().with_port(port);
    *harness.call_site.borrow_mut() = layer;
}

#[when("the configuration loads without overrides")]
fn when_load_without_overrides(harness: &Harness) {
    harness.resolve();
}

#[then("the logs directory resolves to the system temporary directory")]
fn then_logsdir_is_temp(harness: &Harness) {
    assert_eq!(harness.config().logsdir(), default_logsdir().as_path());
}

#[then("the logs directory resolves to \"{dir}\"")]
fn then_logsdir_is(harness: &Harness, dir: String) {
    assert_eq!(harness.config().logsdir().as_str(), dir);
}

#[then("the host resolves to \"{host}\"")]
fn then_host_is(harness: &Harness, host: String) {
    assert_eq!(harness.config().host(), host);
}

#[then("the index store type resolves to \"{store}\"")]
fn then_store_is(harness: &Harness, store: String) {
    assert_eq!(harness.config().index_store_type(), store);
}

#[then("no port is pinned")]
fn then_no_port(harness: &Harness) {
    assert_eq!(harness.config().port(), None);
}

#[then("the port resolves to {port}")]
fn then_port_is(harness: &Harness, port: u16) {
    assert_eq!(harness.config().port(), Some(port));
}

#[scenario(
    path = "tests/features/configuration_precedence.feature",
    name = "Built-in defaults apply without overrides"
)]
fn defaults_apply(#[from(harness)] harness: Harness) {
    let _ = harness;
}

#[scenario(
    path = "tests/features/configuration_precedence.feature",
    name = "Project file supplies the logs directory"
)]
fn project_file_applies(#[from(harness)] harness: Harness) {
    let _ = harness;
}

#[scenario(
    path = "tests/features/configuration_precedence.feature",
    name = "Runner option beats the project file"
)]
fn option_beats_project_file(#[from(harness)] harness: Harness) {
    let _ = harness;
}

#[scenario(
    path = "tests/features/configuration_precedence.feature",
    name = "Call-site argument beats the runner option and the project file"
)]
fn call_site_beats_everything(#[from(harness)] harness: Harness) {
    let _ = harness;
}

#[scenario(
    path = "tests/features/configuration_precedence.feature",
    name = "Precedence is decided per setting"
)]
fn precedence_per_setting(#[from(harness)] harness: Harness) {
    let _ = harness;
}
