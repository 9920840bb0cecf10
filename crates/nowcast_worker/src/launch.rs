//! Subprocess launching for [`NextWorker`] values, grounded in the
//! reference implementation's `NextWorker.launch`: a detached, non-waited
//! child process, either on localhost or over ssh to a configured remote
//! host.

use std::process::{Command, Stdio};

use nowcast_protocol::{Config, NextWorker};
use tracing::{error, info};

/// Spawn `next` as a detached subprocess. Errors are logged; the caller
/// (the manager or scheduler) never synchronizes with the child.
pub fn launch(next: &NextWorker, config: &Config, logger_name: &str) {
    let result = if next.is_localhost() {
        launch_local(next, config)
    } else {
        launch_remote(next, config)
    };

    match result {
        Ok(()) => info!(
            logger = logger_name,
            module = %next.module,
            host = %next.host,
            "launched worker"
        ),
        Err(e) => error!(
            logger = logger_name,
            module = %next.module,
            host = %next.host,
            error = %e,
            "failed to launch worker"
        ),
    }
}

fn launch_local(next: &NextWorker, config: &Config) -> std::io::Result<()> {
    Command::new(&config.python)
        .arg("-m")
        .arg(&next.module)
        .arg(&config.source_path)
        .args(&next.args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    Ok(())
}

fn launch_remote(next: &NextWorker, config: &Config) -> std::io::Result<()> {
    let remote = config
        .remote_host(&next.host)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::NotFound, e.to_string()))?;

    let mut remote_cmd = format!(
        "source {} ; {} -m {} {}",
        remote.envvars, remote.python, next.module, remote.config_file
    );
    for arg in &next.args {
        remote_cmd.push(' ');
        remote_cmd.push_str(arg);
    }

    Command::new("ssh")
        .arg(&next.host)
        .arg(remote_cmd)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    Ok(())
}
