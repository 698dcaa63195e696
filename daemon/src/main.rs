use crate::app::run_app;

mod app;
mod auth;
pub mod config;
mod drivers;
mod error;
mod management;
mod storage;
mod utils;

fn init_logger() {
    if std::env::var("RUST_LOG").is_err() {
        unsafe {
            std::env::set_var("RUST_LOG", "info");
        }
    }
    pretty_env_logger::init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();
    run_app().await
}
