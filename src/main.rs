use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    soulbrowser_livecall::cli::run().await
}
