#[tokio::main]
async fn main() {
    if let Err(e) = medcascade::run().await {
        eprintln!("medcascade: {e}");
        std::process::exit(1);
    }
}
