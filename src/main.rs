#[tokio::main]
async fn main() -> anyhow::Result<()> {
    timegate_cli::cli::app::run().await
}
