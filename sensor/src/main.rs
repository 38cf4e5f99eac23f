#[cfg(any(feature = "esp32", test))]
mod core2;
#[cfg(feature = "esp32")]
mod esp;
mod form;
#[cfg(not(feature = "esp32"))]
mod host;
#[cfg(not(feature = "esp32"))]
mod portal;
#[cfg(any(feature = "esp32", test))]
mod scd30;

#[cfg(not(feature = "esp32"))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}

#[cfg(feature = "esp32")]
fn main() -> anyhow::Result<()> {
    esp::run()
}
