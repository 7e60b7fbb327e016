mod host;
mod knx_bus;
mod mqtt;
mod sensor;
mod store;
mod web;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
