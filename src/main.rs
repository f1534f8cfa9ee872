use bloomscan_lib::config::ServiceArgs;
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bloomscan_lib::run(ServiceArgs::parse()).await
}
