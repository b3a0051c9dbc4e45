#[tokio::main]
async fn main() -> anyhow::Result<()> {
    winregi_lib::run().await
}
