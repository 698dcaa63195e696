use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::Mutex;
use uuid::Uuid;

use fleet_protocol::{PushMessage, ServerSummary};

use crate::config::{FleetConfig, MysqlConfig};
use crate::error::FleetError;
use crate::management::hub::ClientHandle;
use crate::management::server::{ServerKind, ServerSupervisor, SupervisorSettings};
use crate::storage::fleet_store::{FleetStore, RouterEntry, WorkerEntry};

/// Reserved slug for the front-end proxy; also its key in the persisted
/// document.
pub const ROUTER_SLUG: &str = "bungeecord";

/// Inclusive worker port range plus the set of allocated ports. The
/// router's fixed port is reserved here too so the scan can never hand
/// it out.
pub struct PortTable {
    low: u16,
    high: u16,
    used: BTreeSet<u16>,
}

impl PortTable {
    pub fn new(range: (u16, u16)) -> Self {
        PortTable {
            low: range.0,
            high: range.1,
            used: BTreeSet::new(),
        }
    }

    /// Allocates the smallest free port in range; the table is unchanged
    /// on failure.
    pub fn allocate(&mut self) -> Result<u16, FleetError> {
        for port in self.low..=self.high {
            if !self.used.contains(&port) {
                self.used.insert(port);
                return Ok(port);
            }
        }
        Err(FleetError::NoPortAvailable)
    }

    /// Marks a specific port as taken; duplicate reservations are the
    /// defensive guard against inconsistent persisted entries.
    pub fn reserve(&mut self, port: u16) -> Result<(), FleetError> {
        if !self.used.insert(port) {
            return Err(FleetError::PortUsed(port));
        }
        Ok(())
    }

    pub fn release(&mut self, port: u16) {
        self.used.remove(&port);
    }
}

/// Owner of the fleet: the router slot and worker supervisors, the port
/// table and the persisted membership document. Membership mutations
/// (add/remove/load/reload) serialize on an internal lock; per-slug process
/// operations only read the concurrent supervisor map.
pub struct FleetRegistry {
    fleet: FleetConfig,
    mysql: Option<MysqlConfig>,
    working_root: PathBuf,
    backup_root: PathBuf,
    template_root: PathBuf,
    servers: scc::HashMap<String, Arc<ServerSupervisor>, ahash::RandomState>,
    ports: StdMutex<PortTable>,
    store: Mutex<FleetStore>,
    membership: Mutex<()>,
}

impl FleetRegistry {
    pub fn new(fleet: FleetConfig, mysql: Option<MysqlConfig>) -> Result<Self, FleetError> {
        let working_root = fleet.base_dir.join(&fleet.slug);
        let backup_root = fleet.base_dir.join(format!("{}-backups", fleet.slug));
        let template_root = fleet.base_dir.join(format!("{}-templates", fleet.slug));
        std::fs::create_dir_all(&working_root)?;
        std::fs::create_dir_all(&backup_root)?;
        std::fs::create_dir_all(&template_root)?;

        let store = FleetStore::load_or_init(working_root.join("config.json"))?;
        let ports = PortTable::new(fleet.port_range);

        Ok(FleetRegistry {
            working_root,
            backup_root,
            template_root,
            mysql,
            servers: scc::HashMap::default(),
            ports: StdMutex::new(ports),
            store: Mutex::new(store),
            membership: Mutex::new(()),
            fleet,
        })
    }

    fn template_path(&self, template: &str) -> PathBuf {
        self.template_root.join(format!("{}.tar.xz", template))
    }

    fn build_supervisor(
        &self,
        slug: &str,
        kind: ServerKind,
        name: &str,
        jarfile: &str,
        template: &str,
        port: u16,
        active: bool,
    ) -> Arc<ServerSupervisor> {
        Arc::new(ServerSupervisor::new(SupervisorSettings {
            slug: slug.to_string(),
            name: name.to_string(),
            kind,
            working_dir: self.working_root.join(slug),
            backup_dir: self.backup_root.join(slug),
            template: self.template_path(template),
            jar_file: jarfile.to_string(),
            port,
            active,
            java_path: self.fleet.java_path.clone(),
            start_timeout: Duration::from_secs(self.fleet.start_timeout_secs),
            stop_timeout: Duration::from_secs(self.fleet.stop_timeout_secs),
            mysql: self.mysql.clone(),
        }))
    }

    /// Rehydrates the router and every persisted worker, autostarting the
    /// entries flagged active.
    pub async fn load(&self) -> Result<(), FleetError> {
        let _guard = self.membership.lock().await;
        self.load_router().await?;
        self.load_workers().await;
        Ok(())
    }

    async fn load_router(&self) -> Result<(), FleetError> {
        let entry: RouterEntry = self.store.lock().await.router().clone();
        self.ports.lock().unwrap().reserve(entry.port)?;
        let supervisor = self.build_supervisor(
            ROUTER_SLUG,
            ServerKind::Router,
            &entry.name,
            &entry.jarfile,
            &entry.template,
            entry.port,
            entry.active,
        );
        let _ = self.servers.insert(ROUTER_SLUG.to_string(), supervisor.clone());

        if !entry.ready {
            supervisor.init().await?;
            self.store.lock().await.mark_router_ready()?;
        }
        if entry.active {
            if let Err(err) = supervisor.start().await {
                warn!("could not start router: {}", err);
            }
        }
        Ok(())
    }

    async fn load_workers(&self) {
        let workers = self.store.lock().await.workers().clone();
        let mut autostart = Vec::new();
        for (slug, entry) in workers {
            match self.load_worker(&slug, &entry) {
                Ok(supervisor) => {
                    if entry.active {
                        autostart.push(supervisor);
                    }
                }
                Err(err) => warn!("skipping persisted server '{}': {}", slug, err),
            }
        }

        let starts = autostart.iter().map(|supervisor| {
            let supervisor = supervisor.clone();
            async move {
                if let Err(err) = supervisor.start().await {
                    warn!("could not autostart '{}': {}", supervisor.slug(), err);
                }
            }
        });
        futures::future::join_all(starts).await;
    }

    /// Registers a persisted worker without provisioning or starting it.
    fn load_worker(
        &self,
        slug: &str,
        entry: &WorkerEntry,
    ) -> Result<Arc<ServerSupervisor>, FleetError> {
        self.ports.lock().unwrap().reserve(entry.port)?;
        let supervisor = self.build_supervisor(
            slug,
            ServerKind::Worker,
            &entry.name,
            &entry.jarfile,
            &entry.template,
            entry.port,
            entry.active,
        );
        let _ = self.servers.insert(slug.to_string(), supervisor.clone());
        debug!("registered '{}' on port {}", slug, entry.port);
        Ok(supervisor)
    }

    /// Allocates a port, provisions a fresh supervisor and persists the new
    /// entry only once provisioning succeeded. The port is rolled back on
    /// failure.
    pub async fn add_server(
        &self,
        slug: &str,
        name: &str,
        template: &str,
        jarfile: &str,
    ) -> Result<(), FleetError> {
        let _guard = self.membership.lock().await;

        if slug == ROUTER_SLUG || self.servers.contains(&slug.to_string()) {
            return Err(FleetError::SlugUsed(slug.to_string()));
        }

        let port = self.ports.lock().unwrap().allocate()?;
        let entry = WorkerEntry {
            name: name.to_string(),
            jarfile: jarfile.to_string(),
            template: template.to_string(),
            port,
            active: false,
        };
        let supervisor = self.build_supervisor(
            slug,
            ServerKind::Worker,
            name,
            jarfile,
            template,
            port,
            false,
        );

        if let Err(err) = supervisor.init().await {
            self.ports.lock().unwrap().release(port);
            return Err(err);
        }

        if let Err(err) = self.store.lock().await.insert_worker(slug, entry) {
            self.ports.lock().unwrap().release(port);
            return Err(err);
        }
        let _ = self.servers.insert(slug.to_string(), supervisor);
        info!("added server '{}' on port {}", slug, port);
        Ok(())
    }

    /// Best-effort removal: stop is attempted and its failure ignored, the
    /// port is released and both the in-memory and persisted entries are
    /// deleted.
    pub async fn remove_server(&self, slug: &str) -> Result<(), FleetError> {
        let _guard = self.membership.lock().await;

        if slug == ROUTER_SLUG {
            return Err(FleetError::ServerNotFound(slug.to_string()));
        }
        let Some((_, supervisor)) = self.servers.remove(&slug.to_string()) else {
            return Err(FleetError::ServerNotFound(slug.to_string()));
        };

        if let Err(err) = supervisor.stop().await {
            debug!("ignoring stop failure while removing '{}': {}", slug, err);
        }
        self.ports.lock().unwrap().release(supervisor.port());
        self.store.lock().await.remove_worker(slug)?;
        info!("removed server '{}'", slug);
        Ok(())
    }

    fn get(&self, slug: &str) -> Result<Arc<ServerSupervisor>, FleetError> {
        self.servers
            .read(&slug.to_string(), |_, supervisor| supervisor.clone())
            .ok_or_else(|| FleetError::ServerNotFound(slug.to_string()))
    }

    pub async fn start_server(&self, slug: &str) -> Result<(), FleetError> {
        self.get(slug)?.start().await
    }

    pub async fn stop_server(&self, slug: &str) -> Result<(), FleetError> {
        self.get(slug)?.stop().await
    }

    pub async fn restart_server(&self, slug: &str) -> Result<(), FleetError> {
        self.get(slug)?.restart().await
    }

    pub fn kill_server(&self, slug: &str) -> Result<(), FleetError> {
        self.get(slug)?.kill();
        Ok(())
    }

    pub async fn send_command(&self, slug: &str, command: &str) -> Result<(), FleetError> {
        self.get(slug)?.execute_command(command).await;
        Ok(())
    }

    pub async fn backup_server(&self, slug: &str) -> Result<(), FleetError> {
        self.get(slug)?.backup().await
    }

    /// Flips the persisted activation flag; workers only, independent of
    /// the running state.
    pub async fn set_server_active(&self, slug: &str, active: bool) -> Result<(), FleetError> {
        if slug == ROUTER_SLUG {
            return Err(FleetError::ServerNotFound(slug.to_string()));
        }
        let supervisor = self.get(slug)?;
        self.store.lock().await.set_worker_active(slug, active)?;
        supervisor.set_active(active);
        Ok(())
    }

    /// Stops everything, discards the in-memory fleet and rehydrates from
    /// the persisted document; picks up out-of-band edits.
    pub async fn reload(&self) -> Result<(), FleetError> {
        let _guard = self.membership.lock().await;
        info!("reloading the fleet");

        self.stop_all().await;
        self.servers.clear();
        *self.ports.lock().unwrap() = PortTable::new(self.fleet.port_range);
        *self.store.lock().await = FleetStore::load_or_init(self.working_root.join("config.json"))?;

        self.load_router().await?;
        self.load_workers().await;
        Ok(())
    }

    /// Best-effort stop of every running supervisor; used by reload and the
    /// daemon's graceful-shutdown path.
    pub async fn shutdown(&self) {
        let _guard = self.membership.lock().await;
        self.stop_all().await;
    }

    async fn stop_all(&self) {
        let stops = self.snapshot().into_iter().map(|supervisor| async move {
            if let Err(err) = supervisor.stop().await {
                debug!("ignoring stop failure for '{}': {}", supervisor.slug(), err);
            }
        });
        futures::future::join_all(stops).await;
    }

    fn snapshot(&self) -> Vec<Arc<ServerSupervisor>> {
        let mut supervisors = Vec::new();
        self.servers
            .scan(|_, supervisor| supervisors.push(supervisor.clone()));
        supervisors
    }

    /// Fleet membership, router first, workers ordered by slug.
    pub fn servers_list(&self) -> Vec<ServerSummary> {
        let mut workers: Vec<ServerSummary> = Vec::new();
        let mut router = None;
        self.servers.scan(|slug, supervisor| {
            if slug == ROUTER_SLUG {
                router = Some(supervisor.summary());
            } else {
                workers.push(supervisor.summary());
            }
        });
        workers.sort_by(|a, b| a.slug.cmp(&b.slug));
        let mut list = Vec::with_capacity(workers.len() + 1);
        list.extend(router);
        list.extend(workers);
        list
    }

    /// Sends the membership list plus every entity's detail snapshot, then
    /// registers the client on each entity's detail channel. Membership is
    /// captured at subscribe time; servers added later are not included.
    pub fn subscribe_fleet(&self, handle: ClientHandle) {
        handle.send(PushMessage::ServersList(self.servers_list()));
        for supervisor in self.snapshot() {
            supervisor.subscribe_detail(handle.clone());
        }
    }

    pub fn unsubscribe_fleet(&self, id: Uuid) {
        for supervisor in self.snapshot() {
            supervisor.unsubscribe_detail(id);
        }
    }

    pub fn subscribe_detail(&self, slug: &str, handle: ClientHandle) -> Result<(), FleetError> {
        self.get(slug)?.subscribe_detail(handle);
        Ok(())
    }

    pub fn unsubscribe_detail(&self, slug: &str, id: Uuid) -> Result<(), FleetError> {
        self.get(slug)?.unsubscribe_detail(id);
        Ok(())
    }

    pub fn subscribe_console(&self, slug: &str, handle: ClientHandle) -> Result<(), FleetError> {
        self.get(slug)?.subscribe_console(handle);
        Ok(())
    }

    pub fn unsubscribe_console(&self, slug: &str, id: Uuid) -> Result<(), FleetError> {
        self.get(slug)?.unsubscribe_console(id);
        Ok(())
    }

    /// Detaches a disconnected client from every supervisor's channels.
    pub fn drop_client(&self, id: Uuid) {
        for supervisor in self.snapshot() {
            supervisor.drop_client(id);
        }
    }
}
