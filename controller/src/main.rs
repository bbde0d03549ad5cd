mod archive;
mod dispatcher;
mod gateway;
mod host;
mod reconciler;
mod scheduler;
mod store;
mod telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
