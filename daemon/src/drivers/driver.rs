use super::Drivers;

/// A command surface the daemon exposes to operators. Every enabled driver
/// runs for the whole daemon lifetime and drains its own connections when
/// the stop signal fires.
#[async_trait::async_trait]
pub trait Driver: Send + Sync {
    async fn run(&self);

    fn driver_type(&self) -> Drivers;
}
