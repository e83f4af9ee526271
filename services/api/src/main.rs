use leadflow_api::run;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("leadflow error: {err}");
        std::process::exit(1);
    }
}
