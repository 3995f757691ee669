//! Child server process lifecycle
//!
//! For each managed server the supervisor populates an instance directory
//! from the binary template, synthesizes the server configuration, launches
//! the executable with piped stdio, and watches stdout for the readiness
//! marker. Stopping writes a newline to stdin and escalates to a kill after
//! a grace period.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use peernet_core::{Server, ServerKind, SimError, SimResult};
use peernet_loc::LocServer;

use crate::context::{copy_dir_recursive, SimPaths};

/// How long a child may take to print its readiness marker.
const START_TIMEOUT: Duration = Duration::from_secs(60);

/// How long a started child may take to complete LOC registration.
const LOC_INIT_TIMEOUT: Duration = Duration::from_secs(45);

/// How long a child may take to exit after the stop newline.
const STOP_TIMEOUT: Duration = Duration::from_secs(20);

/// Log lines counted as errors.
const LOG_ERROR_MARK: &str = "] ERROR:";

/// Log lines counted as warnings.
const LOG_WARN_MARK: &str = "] WARN:";

/// Benign log lines the scan ignores; the simulator's own connection churn
/// produces these.
const LOG_ALLOWLIST: &[&str] = &[
    "Failed to decode message header",
    "Connection reset by peer",
    "Socket closed by remote party",
];

/// Result of scanning a server's log files.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogScan {
    /// Error lines outside the allowlist
    pub errors: usize,
    /// Warning lines outside the allowlist
    pub warnings: usize,
}

/// One managed server: its record, its LOC endpoint, and its child process.
pub struct ServerProcess {
    server: Arc<Server>,
    loc: LocServer,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
}

impl ServerProcess {
    /// Wrap a server record and its running LOC endpoint.
    pub fn new(server: Arc<Server>, loc: LocServer) -> Self {
        Self {
            server,
            loc,
            child: None,
            stdin: None,
        }
    }

    /// The managed server record.
    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }

    /// The server's LOC endpoint.
    pub fn loc(&self) -> &LocServer {
        &self.loc
    }

    /// Populate the instance directory: binary template copy plus generated
    /// configuration.
    pub fn ensure_instance(&self, paths: &SimPaths) -> SimResult<()> {
        let instance = self.server.instance_dir();
        if !instance.is_dir() {
            let template = paths.bin_template(self.server.kind());
            copy_dir_recursive(&template, instance, &[])?;
        }
        let config = render_config(&self.server);
        std::fs::write(instance.join(self.server.kind().config_file()), config).map_err(|e| {
            SimError::io(format!(
                "cannot write configuration for {}: {e}",
                self.server.name()
            ))
        })?;
        Ok(())
    }

    /// Launch the child and wait for readiness and LOC initialization.
    pub async fn start(&mut self, paths: &SimPaths) -> SimResult<()> {
        if self.child.is_some() {
            return Err(SimError::process(format!(
                "server {} is already running",
                self.server.name()
            )));
        }
        self.ensure_instance(paths)?;

        let executable = self
            .server
            .instance_dir()
            .join(self.server.kind().template_dir());
        let mut child = Command::new(&executable)
            .current_dir(self.server.instance_dir())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                SimError::process(format!(
                    "cannot launch {} for {}: {e}",
                    executable.display(),
                    self.server.name()
                ))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SimError::process("child stdout not piped"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SimError::process("child stderr not piped"))?;
        self.stdin = child.stdin.take();
        self.child = Some(child);

        let (ready_tx, mut ready_rx) = watch::channel(false);
        tokio::spawn(pump_stdout(stdout, Arc::clone(&self.server), ready_tx));
        tokio::spawn(pump_stderr(stderr, Arc::clone(&self.server)));

        let marker = self.server.kind().readiness_marker();
        wait_for_flag(&mut ready_rx, START_TIMEOUT)
            .await
            .map_err(|_| {
                SimError::process(format!(
                    "server {} did not print '{marker}' within {START_TIMEOUT:?}",
                    self.server.name()
                ))
            })?;

        let mut init_rx = self.server.init_watch();
        wait_for_flag(&mut init_rx, LOC_INIT_TIMEOUT)
            .await
            .map_err(|_| {
                SimError::process(format!(
                    "server {} did not complete LOC registration within {LOC_INIT_TIMEOUT:?}",
                    self.server.name()
                ))
            })?;

        self.server.set_running(true);
        info!(server = %self.server.name(), "server started");
        Ok(())
    }

    /// Ask the child to exit via stdin; kill it after the grace period.
    pub async fn stop(&mut self) -> SimResult<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.write_all(b"\n").await;
            let _ = stdin.flush().await;
        }
        match tokio::time::timeout(STOP_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(server = %self.server.name(), %status, "server exited");
            }
            Ok(Err(e)) => {
                return Err(SimError::process(format!(
                    "waiting for {} failed: {e}",
                    self.server.name()
                )));
            }
            Err(_) => {
                warn!(
                    server = %self.server.name(),
                    "no clean exit within {STOP_TIMEOUT:?}, killing"
                );
                child.kill().await.map_err(|e| {
                    SimError::process(format!("cannot kill {}: {e}", self.server.name()))
                })?;
            }
        }
        self.server.set_running(false);
        self.server.uninitialize();
        self.server.clear_location_ready();
        info!(server = %self.server.name(), "server stopped");
        Ok(())
    }

    /// Stop the LOC endpoint, then the child.
    pub async fn shutdown(&mut self) -> SimResult<()> {
        self.loc.shutdown().await;
        self.stop().await
    }

    /// Count error and warning lines in the instance's log files, modulo
    /// the allowlist.
    pub fn scan_logs(&self) -> SimResult<LogScan> {
        scan_instance_logs(self.server.instance_dir())
    }
}

/// Scan an instance directory's `Logs/` for error and warning lines.
pub fn scan_instance_logs(instance_dir: &std::path::Path) -> SimResult<LogScan> {
    let mut scan = LogScan::default();
    let logs = instance_dir.join("Logs");
    if !logs.is_dir() {
        return Ok(scan);
    }
    scan_log_dir(&logs, &mut scan)?;
    Ok(scan)
}

fn scan_log_dir(dir: &std::path::Path, scan: &mut LogScan) -> SimResult<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            scan_log_dir(&entry.path(), scan)?;
            continue;
        }
        let content = String::from_utf8_lossy(&std::fs::read(entry.path())?).into_owned();
        for line in content.lines() {
            if LOG_ALLOWLIST.iter().any(|allowed| line.contains(allowed)) {
                continue;
            }
            if line.contains(LOG_ERROR_MARK) {
                scan.errors += 1;
            } else if line.contains(LOG_WARN_MARK) {
                scan.warnings += 1;
            }
        }
    }
    Ok(())
}

async fn wait_for_flag(
    rx: &mut watch::Receiver<bool>,
    deadline: Duration,
) -> Result<(), tokio::time::error::Elapsed> {
    tokio::time::timeout(deadline, async {
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                // Sender gone without the flag: wait out the deadline.
                std::future::pending::<()>().await;
            }
        }
    })
    .await
}

async fn pump_stdout(
    stdout: tokio::process::ChildStdout,
    server: Arc<Server>,
    ready_tx: watch::Sender<bool>,
) {
    let marker = server.kind().readiness_marker();
    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        trace!(server = %server.name(), line = %line, "stdout");
        if line.contains(marker) {
            if server.kind() == ServerKind::Proximity {
                server.mark_location_ready();
            }
            ready_tx.send_replace(true);
        }
    }
    debug!(server = %server.name(), "stdout pump finished");
}

async fn pump_stderr(stderr: tokio::process::ChildStderr, server: Arc<Server>) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        trace!(server = %server.name(), line = %line, "stderr");
    }
}

/// Render the configuration file for a server, `key = value` per line.
pub fn render_config(server: &Server) -> String {
    let base = server.base_port();
    match server.kind() {
        ServerKind::Profile => format!(
            "test_mode = 1\n\
             external_server_address = 127.0.0.1\n\
             bind_to_interface = 127.0.0.1\n\
             primary_interface_port = {primary}\n\
             server_neighbor_interface_port = {neighbor}\n\
             client_non_customer_interface_port = {non_customer}\n\
             client_customer_interface_port = {customer}\n\
             client_app_service_interface_port = {app_service}\n\
             tls_server_certificate = ProfileServer.pfx\n\
             image_data_folder = images\n\
             tmp_data_folder = tmp\n\
             db_file_name = ProfileServer.db\n\
             max_hosted_identities = 20000\n\
             max_identity_relations = 100\n\
             neighborhood_initialization_parallelism = 10\n\
             loc_port = {loc}\n\
             neighbor_profiles_expiration_time = 86400\n\
             max_neighborhood_size = 110\n\
             max_follower_servers_count = 200\n\
             follower_refresh_time = 43200\n\
             can_api_port = {can}\n",
            primary = base + 1,
            neighbor = base + 2,
            non_customer = base + 3,
            customer = base + 4,
            app_service = base + 5,
            loc = base,
            can = base + 6,
        ),
        ServerKind::Proximity => format!(
            "test_mode = 1\n\
             external_server_address = 127.0.0.1\n\
             bind_to_interface = 127.0.0.1\n\
             primary_interface_port = {primary}\n\
             neighbor_interface_port = {neighbor}\n\
             client_interface_port = {client}\n\
             tls_server_certificate = ProximityServer.pfx\n\
             image_data_folder = images\n\
             tmp_data_folder = tmp\n\
             db_file_name = ProximityServer.db\n\
             max_activities = 50000\n\
             neighborhood_initialization_parallelism = 10\n\
             loc_port = {loc}\n\
             neighbor_expiration_time = 86400\n\
             max_neighborhood_size = 110\n\
             max_follower_servers_count = 200\n\
             follower_refresh_time = 43200\n\
             can_api_port = {can}\n",
            primary = base + 1,
            neighbor = base + 2,
            client = base + 3,
            loc = base,
            can = base + 6,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peernet_core::GpsLocation;
    use std::path::Path;

    #[test]
    fn profile_config_lists_every_required_key() {
        let server = Server::new(
            "A001",
            ServerKind::Profile,
            GpsLocation::new(10.0, 20.0).unwrap(),
            10_000,
            Path::new("instances"),
        );
        let config = render_config(&server);
        for key in [
            "test_mode",
            "external_server_address",
            "bind_to_interface",
            "primary_interface_port = 10001",
            "server_neighbor_interface_port = 10002",
            "client_non_customer_interface_port = 10003",
            "client_customer_interface_port = 10004",
            "client_app_service_interface_port = 10005",
            "tls_server_certificate",
            "image_data_folder",
            "tmp_data_folder",
            "db_file_name",
            "max_hosted_identities = 20000",
            "max_identity_relations",
            "neighborhood_initialization_parallelism",
            "loc_port = 10000",
            "neighbor_profiles_expiration_time",
            "max_neighborhood_size",
            "max_follower_servers_count",
            "follower_refresh_time",
            "can_api_port = 10006",
        ] {
            assert!(config.contains(key), "missing {key}");
        }
    }

    #[test]
    fn proximity_config_uses_its_own_keys() {
        let server = Server::new(
            "PX001",
            ServerKind::Proximity,
            GpsLocation::new(10.0, 20.0).unwrap(),
            20_000,
            Path::new("instances"),
        );
        let config = render_config(&server);
        assert!(config.contains("neighbor_interface_port = 20002"));
        assert!(config.contains("client_interface_port = 20003"));
        assert!(config.contains("max_activities = 50000"));
        assert!(config.contains("neighbor_expiration_time"));
        assert!(!config.contains("max_hosted_identities"));
        assert!(!config.contains("server_neighbor_interface_port"));
    }

    #[test]
    fn log_scan_honors_the_allowlist() {
        let dir = tempfile::tempdir().unwrap();
        let instance = dir.path().join("Ps-A001");
        std::fs::create_dir_all(instance.join("Logs")).unwrap();
        std::fs::write(
            instance.join("Logs/server.log"),
            "2026-01-01 [1] INFO: started\n\
             2026-01-01 [1] ERROR: database locked\n\
             2026-01-01 [1] ERROR: Failed to decode message header\n\
             2026-01-01 [1] WARN: slow query\n\
             2026-01-01 [1] WARN: Connection reset by peer\n",
        )
        .unwrap();

        let scan = scan_instance_logs(&instance).unwrap();
        assert_eq!(scan.errors, 1);
        assert_eq!(scan.warnings, 1);
    }

    #[test]
    fn missing_logs_directory_scans_clean() {
        let dir = tempfile::tempdir().unwrap();
        let scan = scan_instance_logs(dir.path()).unwrap();
        assert_eq!(scan.errors, 0);
        assert_eq!(scan.warnings, 0);
    }
}
