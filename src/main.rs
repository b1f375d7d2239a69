//! agora binary: argument parsing and process exit codes live in `cli`.

mod cli;

#[tokio::main]
async fn main() {
    if let Err(e) = cli::run().await {
        eprintln!("agora: {e}");
        std::process::exit(1);
    }
}
