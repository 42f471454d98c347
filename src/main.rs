#[tokio::main]
async fn main() -> anyhow::Result<()> {
    jessie_pos_lib::run().await
}
