// Market Dashboard service entry point

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    market_dashboard::run().await?;
    Ok(())
}
