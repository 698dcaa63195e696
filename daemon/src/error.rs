use thiserror::Error;

/// Operation error surfaced across the command boundary. Every variant maps
/// to a stable kind string via [`FleetError::kind`]; the display message
/// carries the human-readable detail.
#[derive(Error, Debug)]
pub enum FleetError {
    #[error("server is already running")]
    AlreadyStarted,
    #[error("server is not running")]
    NotRunning,
    #[error("server is still running, stop it first")]
    StillRunning,
    #[error("port {0} is already allocated")]
    PortUsed(u16),
    #[error("no free port left in the configured range")]
    NoPortAvailable,
    #[error("slug '{0}' is already registered")]
    SlugUsed(String),
    #[error("no server registered under '{0}'")]
    ServerNotFound(String),
    #[error("template extraction failed: {0}")]
    TemplateError(String),
    #[error("database provisioning failed: {0}")]
    MysqlProvisionError(String),
    #[error("database dump failed: {0}")]
    MysqlBackupError(String),
    #[error("archive step failed: {0}")]
    MinecraftBackupError(String),
    #[error("no ready-signal within {0} seconds")]
    StartTimeout(u64),
    #[error("process exited before reaching readiness")]
    StartAborted,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("persistence error: {0}")]
    Persistence(#[from] serde_json::Error),
}

impl FleetError {
    /// Stable wire-facing kind string.
    pub fn kind(&self) -> &'static str {
        match self {
            FleetError::AlreadyStarted => "already-started",
            FleetError::NotRunning => "not-running",
            FleetError::StillRunning => "error-running",
            FleetError::PortUsed(_) => "port-used",
            FleetError::NoPortAvailable => "no-port-available",
            FleetError::SlugUsed(_) => "slug-used",
            FleetError::ServerNotFound(_) => "server-not-found",
            FleetError::TemplateError(_) => "template-error",
            FleetError::MysqlProvisionError(_) => "mysql-provision-error",
            FleetError::MysqlBackupError(_) => "mysql-backup-error",
            FleetError::MinecraftBackupError(_) => "minecraft-backup-error",
            FleetError::StartTimeout(_) => "start-timeout",
            FleetError::StartAborted => "start-aborted",
            FleetError::Io(_) => "io-error",
            FleetError::Persistence(_) => "persistence-error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_are_stable() {
        assert_eq!(FleetError::AlreadyStarted.kind(), "already-started");
        assert_eq!(FleetError::NotRunning.kind(), "not-running");
        assert_eq!(FleetError::StillRunning.kind(), "error-running");
        assert_eq!(FleetError::NoPortAvailable.kind(), "no-port-available");
        assert_eq!(
            FleetError::MysqlBackupError("denied".into()).kind(),
            "mysql-backup-error"
        );
        assert_eq!(
            FleetError::MinecraftBackupError("tar: exit 2".into()).kind(),
            "minecraft-backup-error"
        );
    }
}
