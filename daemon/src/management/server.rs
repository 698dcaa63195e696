use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use log::{error, info, warn};
use sha1::{Digest, Sha1};
use tokio::process::Command;
use tokio::select;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::timeout;

use fleet_protocol::{
    LastBackup, MonitorSample, PushMessage, ServerDetail, ServerState, ServerSummary,
};

use crate::config::MysqlConfig;
use crate::error::FleetError;
use crate::management::classifier::{classify, LineSignal};
use crate::management::hub::{Channel, ClientHandle, SubscriptionHub};
use crate::management::monitor::{spawn_monitor, MonitorHandle};
use crate::management::process::{spawn_pump, ProcessEvent, ProcessHandle};
use crate::management::properties::ServerProperties;
use crate::utils::History;

pub const CONSOLE_CAPACITY: usize = 500;
pub const MONITOR_CAPACITY: usize = 100;
const BACKUP_DATE_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerKind {
    /// BungeeCord-style proxy with a fixed port and its own log format.
    Router,
    /// Spigot-style worker with an allocated port.
    Worker,
}

impl ServerKind {
    fn stop_command(&self) -> &'static str {
        match self {
            ServerKind::Router => "end",
            ServerKind::Worker => "stop",
        }
    }
}

/// One completed backup artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupRecord {
    pub date: NaiveDateTime,
    pub size: u64,
}

impl BackupRecord {
    pub fn wire_date(&self) -> String {
        self.date.format(BACKUP_DATE_FORMAT).to_string()
    }
}

/// Per-worker database identity, derived deterministically from the slug.
#[derive(Debug, Clone)]
struct DbCredentials {
    user: String,
    database: String,
    password: String,
}

impl DbCredentials {
    fn derive(slug: &str) -> Self {
        let digest = Sha1::digest(slug.as_bytes());
        let password: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        DbCredentials {
            user: slug.to_string(),
            database: slug.to_string(),
            password,
        }
    }
}

/// Everything a supervisor needs to know about its server, fixed at
/// construction time.
pub struct SupervisorSettings {
    pub slug: String,
    pub name: String,
    pub kind: ServerKind,
    pub working_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub template: PathBuf,
    pub jar_file: String,
    pub port: u16,
    pub active: bool,
    pub java_path: String,
    pub start_timeout: Duration,
    pub stop_timeout: Duration,
    pub mysql: Option<MysqlConfig>,
}

/// Owner of one external server process: lifecycle FSM, console pump,
/// resource monitoring, player roster and the backup pipeline.
///
/// `start`/`stop`/`restart`/`backup` serialize on an internal op lock so
/// their state guards are atomic against overlapping calls; `kill` and
/// `execute_command` bypass it on purpose (kill is the only cancellation
/// primitive while start/stop is suspended).
pub struct ServerSupervisor {
    slug: String,
    name: String,
    kind: ServerKind,
    working_dir: PathBuf,
    backup_dir: PathBuf,
    template: PathBuf,
    jar_file: String,
    port: u16,
    java_path: String,
    start_timeout: Duration,
    stop_timeout: Duration,
    mysql: Option<MysqlConfig>,
    db: DbCredentials,

    active: AtomicBool,
    state_tx: watch::Sender<ServerState>,
    process: StdMutex<Option<Arc<ProcessHandle>>>,
    monitor: StdMutex<Option<MonitorHandle>>,
    players: StdMutex<BTreeMap<String, String>>,
    console: StdMutex<History<String>>,
    samples: StdMutex<History<MonitorSample>>,
    backups: StdMutex<Vec<BackupRecord>>,
    hub: SubscriptionHub,
    op_lock: Mutex<()>,
}

impl ServerSupervisor {
    pub fn new(settings: SupervisorSettings) -> Self {
        let db = DbCredentials::derive(&settings.slug);
        let (state_tx, _) = watch::channel(ServerState::Stopped);
        let supervisor = ServerSupervisor {
            slug: settings.slug,
            name: settings.name,
            kind: settings.kind,
            working_dir: settings.working_dir,
            backup_dir: settings.backup_dir,
            template: settings.template,
            jar_file: settings.jar_file,
            port: settings.port,
            java_path: settings.java_path,
            start_timeout: settings.start_timeout,
            stop_timeout: settings.stop_timeout,
            mysql: settings.mysql,
            db,
            active: AtomicBool::new(settings.active),
            state_tx,
            process: StdMutex::new(None),
            monitor: StdMutex::new(None),
            players: StdMutex::new(BTreeMap::new()),
            console: StdMutex::new(History::new(CONSOLE_CAPACITY)),
            samples: StdMutex::new(History::new(MONITOR_CAPACITY)),
            backups: StdMutex::new(Vec::new()),
            hub: SubscriptionHub::new(),
            op_lock: Mutex::new(()),
        };
        supervisor.load_backups();
        supervisor
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> ServerState {
        *self.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ServerState> {
        self.state_tx.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    /// Flips the activation flag; independent of the running state.
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
        self.hub.publish(
            Channel::Detail,
            &PushMessage::ServerActive {
                slug: self.slug.clone(),
                is_active: active,
            },
        );
    }

    fn set_state(&self, state: ServerState) {
        self.state_tx.send_replace(state);
        self.hub.publish(
            Channel::Detail,
            &PushMessage::ServerRunning {
                slug: self.slug.clone(),
                running: state,
            },
        );
    }

    fn process_handle(&self) -> Option<Arc<ProcessHandle>> {
        self.process.lock().unwrap().clone()
    }

    /// Provisions durable resources for a freshly added server: working
    /// dir, database (when MySQL is configured), template tree, backup dir.
    pub async fn init(&self) -> Result<(), FleetError> {
        info!("initializing \"{}\"({})", self.name, self.slug);
        tokio::fs::create_dir_all(&self.working_dir).await?;

        if let Some(mysql) = self.mysql.clone() {
            self.provision_database(&mysql).await?;
        }

        let output = Command::new("tar")
            .arg("-xJf")
            .arg(&self.template)
            .arg("-C")
            .arg(&self.working_dir)
            .args(["--strip-components", "1"])
            .output()
            .await
            .map_err(|err| FleetError::TemplateError(err.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!(
                "template extraction failed for \"{}\"({}): {}",
                self.name, self.slug, stderr
            );
            return Err(FleetError::TemplateError(stderr));
        }
        info!("template cloned for \"{}\"({})", self.name, self.slug);

        tokio::fs::create_dir_all(&self.backup_dir).await?;
        Ok(())
    }

    async fn provision_database(&self, mysql: &MysqlConfig) -> Result<(), FleetError> {
        info!("creating database for \"{}\"({})", self.name, self.slug);
        let statement = format!(
            "CREATE DATABASE IF NOT EXISTS `{db}`; \
             CREATE USER IF NOT EXISTS '{user}'@'localhost' IDENTIFIED BY '{password}'; \
             GRANT ALL PRIVILEGES ON `{db}`.* TO '{user}'@'localhost';",
            db = self.db.database,
            user = self.db.user,
            password = self.db.password,
        );
        let output = Command::new("mysql")
            .args(["-h", &mysql.host])
            .args(["-P", &mysql.port.to_string()])
            .args(["-u", &mysql.user])
            .args(["-e", &statement])
            .env("MYSQL_PWD", &mysql.password)
            .output()
            .await
            .map_err(|err| FleetError::MysqlProvisionError(err.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!(
                "database provisioning failed for \"{}\"({}): {}",
                self.name, self.slug, stderr
            );
            return Err(FleetError::MysqlProvisionError(stderr));
        }
        Ok(())
    }

    /// Starts the process and suspends until the ready-signal arrives. An
    /// early exit yields `start-aborted`; missing the startup deadline
    /// kills the process and yields `start-timeout`.
    pub async fn start(self: &Arc<Self>) -> Result<(), FleetError> {
        let _guard = self.op_lock.lock().await;

        if self.state() != ServerState::Stopped {
            warn!(
                "tried to start \"{}\"({}) but it is already running on port {}",
                self.name, self.slug, self.port
            );
            return Err(FleetError::AlreadyStarted);
        }

        if self.kind == ServerKind::Worker {
            let path = self.working_dir.join("server.properties");
            let mut properties = ServerProperties::load(&path).await?;
            properties.update("server-port", &self.port.to_string());
            properties.save().await?;
        }

        info!(
            "starting \"{}\"({}) on port {}",
            self.name, self.slug, self.port
        );
        self.players.lock().unwrap().clear();
        self.console.lock().unwrap().clear();
        self.samples.lock().unwrap().clear();

        let mut state_rx = self.state_tx.subscribe();
        self.set_state(ServerState::Starting);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let handle = match spawn_pump(
            &self.java_path,
            &["-jar", &self.jar_file, "nogui"],
            &self.working_dir,
            event_tx,
        ) {
            Ok(handle) => Arc::new(handle),
            Err(err) => {
                self.set_state(ServerState::Stopped);
                return Err(err.into());
            }
        };
        *self.process.lock().unwrap() = Some(handle);

        tokio::spawn({
            let supervisor = Arc::clone(self);
            async move { supervisor.event_loop(event_rx).await }
        });

        let deadline = tokio::time::sleep(self.start_timeout);
        tokio::pin!(deadline);
        loop {
            select! {
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        return Err(FleetError::StartAborted);
                    }
                    match *state_rx.borrow_and_update() {
                        ServerState::Started => return Ok(()),
                        ServerState::Stopped => return Err(FleetError::StartAborted),
                        _ => {}
                    }
                }
                _ = &mut deadline => {
                    warn!(
                        "\"{}\"({}) produced no ready-signal within {}s, killing it",
                        self.name,
                        self.slug,
                        self.start_timeout.as_secs()
                    );
                    self.kill();
                    return Err(FleetError::StartTimeout(self.start_timeout.as_secs()));
                }
            }
        }
    }

    /// Consumes output and the exit notification of one process run.
    /// Player signals keep flowing for the whole process lifetime,
    /// independent of any pending start/stop call.
    async fn event_loop(self: Arc<Self>, mut event_rx: mpsc::UnboundedReceiver<ProcessEvent>) {
        while let Some(event) = event_rx.recv().await {
            match event {
                ProcessEvent::Stdout(line) => {
                    self.push_console(line.clone());
                    if let Some(signal) = classify(&line) {
                        self.handle_signal(signal);
                    }
                }
                ProcessEvent::Stderr(line) => {
                    self.push_console(format!("[STDERR] {}", line));
                }
                ProcessEvent::Exited(code) => {
                    self.handle_exit(code);
                    break;
                }
            }
        }
    }

    fn push_console(&self, line: String) {
        self.console.lock().unwrap().push(line.clone());
        self.hub.publish(
            Channel::Console,
            &PushMessage::ServerConsoleLine {
                slug: self.slug.clone(),
                line,
            },
        );
    }

    fn handle_signal(self: &Arc<Self>, signal: LineSignal) {
        match (signal, self.kind) {
            (LineSignal::WorkerReady, ServerKind::Worker)
            | (LineSignal::RouterReady, ServerKind::Router) => {
                if self.state() == ServerState::Starting {
                    info!("\"{}\"({}) is ready", self.name, self.slug);
                    self.set_state(ServerState::Started);
                    self.start_monitoring();
                }
            }
            (LineSignal::PlayerJoined { name, ip }, _) => {
                self.players.lock().unwrap().insert(name.clone(), ip.clone());
                self.hub.publish(
                    Channel::Detail,
                    &PushMessage::ServerPlayerLogin {
                        slug: self.slug.clone(),
                        name,
                        ip,
                    },
                );
            }
            (LineSignal::PlayerLeft { name }, _) => {
                let ip = self
                    .players
                    .lock()
                    .unwrap()
                    .remove(&name)
                    .unwrap_or_default();
                self.hub.publish(
                    Channel::Detail,
                    &PushMessage::ServerPlayerLogout {
                        slug: self.slug.clone(),
                        name,
                        ip,
                    },
                );
            }
            _ => {}
        }
    }

    fn start_monitoring(self: &Arc<Self>) {
        let Some(handle) = self.process_handle() else {
            return;
        };
        let (sample_tx, mut sample_rx) = mpsc::unbounded_channel();
        match spawn_monitor(handle.pid(), sample_tx) {
            Ok(monitor) => {
                *self.monitor.lock().unwrap() = Some(monitor);
            }
            Err(err) => {
                warn!(
                    "could not start monitoring for \"{}\"({}): {}",
                    self.name, self.slug, err
                );
                return;
            }
        }
        tokio::spawn({
            let supervisor = Arc::clone(self);
            async move {
                while let Some(sample) = sample_rx.recv().await {
                    supervisor.samples.lock().unwrap().push(sample.clone());
                    supervisor.hub.publish(
                        Channel::Detail,
                        &PushMessage::ServerMonitoring {
                            slug: supervisor.slug.clone(),
                            monitoring: sample,
                        },
                    );
                }
            }
        });
    }

    /// Runs on every process exit, graceful or not.
    fn handle_exit(&self, code: Option<i32>) {
        if let Some(monitor) = self.monitor.lock().unwrap().take() {
            monitor.stop();
        }
        *self.process.lock().unwrap() = None;
        self.set_state(ServerState::Stopped);
        match code {
            Some(0) => info!("\"{}\"({}) stopped successfully", self.name, self.slug),
            Some(code) => info!(
                "\"{}\"({}) stopped with error code {}",
                self.name, self.slug, code
            ),
            None => info!("\"{}\"({}) was terminated by a signal", self.name, self.slug),
        }
    }

    /// Sends the graceful shutdown command and suspends until the exit
    /// handler has run, escalating to a kill after the stop timeout.
    pub async fn stop(&self) -> Result<(), FleetError> {
        let _guard = self.op_lock.lock().await;

        if self.state() != ServerState::Started {
            warn!(
                "tried to stop \"{}\"({}) but it is not running",
                self.name, self.slug
            );
            return Err(FleetError::NotRunning);
        }

        info!(
            "stopping \"{}\"({}) on port {}",
            self.name, self.slug, self.port
        );
        let mut state_rx = self.state_tx.subscribe();
        self.set_state(ServerState::Stopping);

        // the process may have exited between the guard and the transition
        if self.process_handle().is_none() {
            self.set_state(ServerState::Stopped);
            return Ok(());
        }
        self.send_to_process(self.kind.stop_command()).await;

        if timeout(self.stop_timeout, Self::wait_stopped(&mut state_rx))
            .await
            .is_err()
        {
            warn!(
                "\"{}\"({}) ignored '{}' for {}s, escalating to kill",
                self.name,
                self.slug,
                self.kind.stop_command(),
                self.stop_timeout.as_secs()
            );
            self.kill();
            if timeout(self.stop_timeout, Self::wait_stopped(&mut state_rx))
                .await
                .is_err()
            {
                // pump is gone but no exit was observed; reconcile
                error!(
                    "\"{}\"({}) did not report its exit, forcing STOPPED",
                    self.name, self.slug
                );
                *self.process.lock().unwrap() = None;
                self.set_state(ServerState::Stopped);
            }
        }
        Ok(())
    }

    async fn wait_stopped(state_rx: &mut watch::Receiver<ServerState>) {
        loop {
            if *state_rx.borrow_and_update() == ServerState::Stopped {
                return;
            }
            if state_rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// `stop` then `start`, strictly sequential; a stop failure aborts the
    /// whole operation.
    pub async fn restart(self: &Arc<Self>) -> Result<(), FleetError> {
        info!(
            "restarting \"{}\"({}) on port {}",
            self.name, self.slug, self.port
        );
        self.stop().await?;
        self.start().await
    }

    /// Forcibly terminates the process, bypassing the graceful path. The
    /// exit handler still runs. No-op when nothing is running.
    pub fn kill(&self) {
        match self.process_handle() {
            Some(handle) => {
                warn!("forcibly killing \"{}\"({})", self.name, self.slug);
                handle.kill();
            }
            None => warn!(
                "tried to kill \"{}\"({}) but it is not running",
                self.name, self.slug
            ),
        }
    }

    /// Writes a console command to the process. Fire-and-forget; a no-op
    /// when nothing is running.
    pub async fn execute_command(&self, command: &str) {
        if self.process_handle().is_none() {
            warn!(
                "tried to send command '{}' to \"{}\"({}) but it is not running",
                command, self.name, self.slug
            );
            return;
        }
        info!(
            "sending command '{}' to \"{}\"({})",
            command, self.name, self.slug
        );
        self.send_to_process(command).await;
    }

    async fn send_to_process(&self, line: &str) {
        if let Some(handle) = self.process_handle() {
            if let Err(err) = handle.write_line(line).await {
                warn!(
                    "could not write to \"{}\"({}) stdin: {}",
                    self.name, self.slug, err
                );
            }
        }
    }

    /// Two sequential steps: dump the database into the working dir, then
    /// archive the working dir into `<backup dir>/<timestamp>.tar.xz`. A
    /// record is appended and a backup event published only when both
    /// steps succeeded.
    pub async fn backup(&self) -> Result<(), FleetError> {
        let _guard = self.op_lock.lock().await;

        if self.state() != ServerState::Stopped {
            warn!(
                "tried to backup \"{}\"({}) but it is running",
                self.name, self.slug
            );
            return Err(FleetError::StillRunning);
        }

        info!("performing backup on \"{}\"({})", self.name, self.slug);
        if let Some(mysql) = self.mysql.clone() {
            self.dump_database(&mysql).await?;
        }

        let date = Local::now().naive_local();
        let record = BackupRecord { date, size: 0 };
        let artifact = self
            .backup_dir
            .join(format!("{}.tar.xz", record.wire_date()));

        let output = Command::new("tar")
            .arg("-cJf")
            .arg(&artifact)
            .arg(&self.working_dir)
            .output()
            .await
            .map_err(|err| FleetError::MinecraftBackupError(err.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!(
                "archive step failed for \"{}\"({}): {}",
                self.name, self.slug, stderr
            );
            return Err(FleetError::MinecraftBackupError(stderr));
        }

        let size = tokio::fs::metadata(&artifact).await?.len();
        let record = BackupRecord { size, ..record };
        let wire_date = record.wire_date();
        self.backups.lock().unwrap().push(record);
        info!("performed backup on \"{}\"({})", self.name, self.slug);

        self.hub.publish(
            Channel::Detail,
            &PushMessage::ServerBackup {
                slug: self.slug.clone(),
                date: wire_date,
                size,
            },
        );
        Ok(())
    }

    async fn dump_database(&self, mysql: &MysqlConfig) -> Result<(), FleetError> {
        let dump_path = self.working_dir.join("backup.sql");
        let dump_file = std::fs::File::create(&dump_path)
            .map_err(|err| FleetError::MysqlBackupError(err.to_string()))?;
        let output = Command::new("mysqldump")
            .args(["-h", &mysql.host])
            .args(["-P", &mysql.port.to_string()])
            .args(["-u", &self.db.user])
            .arg(&self.db.database)
            .args(["--single-transaction", "--default-character-set=utf8"])
            .env("MYSQL_PWD", &self.db.password)
            .stdout(Stdio::from(dump_file))
            .output()
            .await
            .map_err(|err| FleetError::MysqlBackupError(err.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!(
                "database dump failed for \"{}\"({}): {}",
                self.name, self.slug, stderr
            );
            return Err(FleetError::MysqlBackupError(stderr));
        }
        info!("dumped database for \"{}\"({})", self.name, self.slug);
        Ok(())
    }

    /// Rehydrates the backup history from `<timestamp>.tar.xz` artifacts
    /// already present in the backup dir. Best-effort; unreadable entries
    /// are skipped.
    fn load_backups(&self) {
        let entries = match std::fs::read_dir(&self.backup_dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        let mut backups = Vec::new();
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let Some(stamp) = file_name
                .to_str()
                .and_then(|name| name.strip_suffix(".tar.xz"))
            else {
                continue;
            };
            let Ok(date) = NaiveDateTime::parse_from_str(stamp, BACKUP_DATE_FORMAT) else {
                continue;
            };
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            backups.push(BackupRecord {
                date,
                size: metadata.len(),
            });
        }
        backups.sort_by_key(|record| record.date);
        *self.backups.lock().unwrap() = backups;
    }

    pub fn backup_history(&self) -> Vec<BackupRecord> {
        self.backups.lock().unwrap().clone()
    }

    pub fn summary(&self) -> ServerSummary {
        ServerSummary {
            slug: self.slug.clone(),
            name: self.name.clone(),
            port: self.port,
            is_active: self.is_active(),
            running: self.state(),
        }
    }

    pub fn detail(&self) -> ServerDetail {
        let state = self.state();
        let monitoring = if state.is_running() {
            self.samples.lock().unwrap().latest().cloned()
        } else {
            None
        };
        let last_backup = self
            .backups
            .lock()
            .unwrap()
            .last()
            .map(|record| LastBackup {
                date: record.wire_date(),
                size: record.size,
            })
            .unwrap_or_else(LastBackup::never);
        ServerDetail {
            slug: self.slug.clone(),
            name: self.name.clone(),
            is_active: self.is_active(),
            running: state,
            monitoring,
            last_backup,
            players: self.players.lock().unwrap().len() as u32,
        }
    }

    /// Sends the current snapshot, then registers for future detail pushes.
    pub fn subscribe_detail(&self, handle: ClientHandle) {
        handle.send(PushMessage::ServerDetail(self.detail()));
        self.hub.subscribe(Channel::Detail, handle);
    }

    /// Replays the console history, then registers for future lines.
    pub fn subscribe_console(&self, handle: ClientHandle) {
        handle.send(PushMessage::ServerConsole {
            slug: self.slug.clone(),
            console: self.console.lock().unwrap().snapshot(),
            length: CONSOLE_CAPACITY,
        });
        self.hub.subscribe(Channel::Console, handle);
    }

    pub fn unsubscribe_detail(&self, id: uuid::Uuid) {
        self.hub.unsubscribe(Channel::Detail, id);
    }

    pub fn unsubscribe_console(&self, id: uuid::Uuid) {
        self.hub.unsubscribe(Channel::Console, id);
    }

    /// Drops a disconnected client from every channel of this supervisor.
    pub fn drop_client(&self, id: uuid::Uuid) {
        self.hub.unsubscribe_all(id);
    }
}
