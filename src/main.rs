#[tokio::main]
async fn main() -> anyhow::Result<()> {
    spice_jadoo_lib::run().await
}
