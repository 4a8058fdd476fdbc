#[tokio::main]
async fn main() -> anyhow::Result<()> {
    llm_bridge::run().await
}
