#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sleuth_classifier::run().await
}
