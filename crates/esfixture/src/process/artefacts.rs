//! Files and directories created for one server instance.
//!
//! Everything recorded here is removed when the instance stops. The logs
//! directory is created but not recorded so logs survive for inspection, and
//! a user-supplied configuration directory is never touched.

use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, warn};

use super::PROCESS_TARGET;
use super::error::ProcessError;
use crate::render::{Instance, RenderedConfig, SETTINGS_FILE_NAME, SettingsFile};

#[derive(Debug, Default)]
pub(super) struct Artefacts {
    files: Vec<Utf8PathBuf>,
    dirs: Vec<Utf8PathBuf>,
}

impl Artefacts {
    /// Creates the directories and generated files the server needs.
    ///
    /// Anything created before a failure is still recorded, so dropping the
    /// partially filled guard cleans up.
    pub(super) fn prepare(
        &mut self,
        instance: &Instance,
        rendered: &RenderedConfig,
        logs_path: &Utf8Path,
    ) -> Result<(), ProcessError> {
        create_dir(logs_path)?;
        self.files.push(instance.pid_path());
        for dir in [instance.home_path(), instance.work_path()] {
            create_dir(&dir)?;
            self.dirs.push(dir);
        }
        if let Some(file) = rendered.settings_file() {
            write_settings_file(file)?;
        }
        Ok(())
    }

    /// Removes every recorded file and directory.
    pub(super) fn cleanup(&mut self) {
        for file in self.files.drain(..) {
            match fs::remove_file(&file) {
                Err(error) if error.kind() != io::ErrorKind::NotFound => {
                    warn!(
                        target: PROCESS_TARGET,
                        file = %file,
                        error = %error,
                        "failed to remove generated file"
                    );
                }
                _ => {}
            }
        }
        for dir in self.dirs.drain(..) {
            match fs::remove_dir_all(&dir) {
                Err(error) if error.kind() != io::ErrorKind::NotFound => {
                    warn!(
                        target: PROCESS_TARGET,
                        dir = %dir,
                        error = %error,
                        "failed to remove generated directory"
                    );
                }
                _ => debug!(target: PROCESS_TARGET, dir = %dir, "removed generated directory"),
            }
        }
    }
}

impl Drop for Artefacts {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn create_dir(path: &Utf8Path) -> Result<(), ProcessError> {
    fs::create_dir_all(path).map_err(|source| ProcessError::Prepare {
        path: path.to_owned(),
        source,
    })
}

/// Writes the settings file after copying the distribution's other
/// configuration files next to it.
fn write_settings_file(file: &SettingsFile) -> Result<(), ProcessError> {
    create_dir(file.dir())?;
    if let Some(seed) = file.seed_from() {
        seed_config_dir(seed, file.dir())?;
    }
    let path = file.path();
    fs::write(&path, file.contents()).map_err(|source| ProcessError::Prepare { path, source })
}

fn seed_config_dir(seed: &Utf8Path, target: &Utf8Path) -> Result<(), ProcessError> {
    let entries = match seed.read_dir_utf8() {
        Ok(entries) => entries,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(source) => {
            return Err(ProcessError::Prepare {
                path: seed.to_owned(),
                source,
            });
        }
    };
    for listed in entries {
        let entry = listed.map_err(|source| ProcessError::Prepare {
            path: seed.to_owned(),
            source,
        })?;
        let is_file = entry.file_type().is_ok_and(|kind| kind.is_file());
        if !is_file || entry.file_name() == SETTINGS_FILE_NAME {
            continue;
        }
        let destination = target.join(entry.file_name());
        fs::copy(entry.path(), &destination).map_err(|source| ProcessError::Prepare {
            path: destination.clone(),
            source,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use esfixture_config::{EffectiveConfig, SettingsLayer, resolve};
    use tempfile::TempDir;

    use super::*;
    use crate::render::render;
    use crate::version::Version;

    fn utf8(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 temp dir")
    }

    #[test]
    fn prepare_seeds_config_and_cleanup_keeps_logs() {
        let scratch = TempDir::new().expect("scratch");
        let distribution = TempDir::new().expect("distribution");
        fs::write(distribution.path().join("jvm.options"), "-Xms256m\n").expect("jvm.options");
        fs::write(distribution.path().join("elasticsearch.yml"), "stale: true\n")
            .expect("stale settings");

        let instance = Instance::new(9301, "cluster_9301", utf8(&scratch))
            .with_distribution_config(Some(utf8(&distribution)));
        let config: EffectiveConfig = resolve(
            &SettingsLayer::default().with_logsdir(utf8(&scratch)),
            &SettingsLayer::default(),
            &SettingsLayer::default(),
        );
        let rendered = render(&config, Version::new(6, 2, 3), &instance).expect("render");
        let logs_path = config.logs_path(9301);

        let mut artefacts = Artefacts::default();
        artefacts
            .prepare(&instance, &rendered, &logs_path)
            .expect("prepare");

        let config_dir = instance.generated_config_dir();
        assert!(config_dir.join("jvm.options").is_file());
        let settings = fs::read_to_string(config_dir.join(SETTINGS_FILE_NAME)).expect("settings");
        assert!(settings.contains("http.port: 9301"));
        assert!(!settings.contains("stale"));

        artefacts.cleanup();

        assert!(!instance.home_path().exists());
        assert!(!instance.work_path().exists());
        assert!(logs_path.is_dir());
    }
}
