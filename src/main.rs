use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    autopost::cli::app::run().await
}
