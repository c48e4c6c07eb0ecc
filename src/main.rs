#[tokio::main]
async fn main() {
    if let Err(err) = webmirror::app::run().await {
        eprintln!("webmirror: {err:#}");
        std::process::exit(1);
    }
}
