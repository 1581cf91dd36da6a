#[tokio::main]
async fn main() -> anyhow::Result<()> {
    provenance_capture::server::run().await
}
