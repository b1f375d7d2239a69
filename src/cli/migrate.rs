//! `agora migrate` - apply pending migrations and exit.

use agora::config::Config;
use agora::db;

pub async fn execute() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env();
    let pool = db::connect(&config.database_url).await?;
    let report = db::migrations::run(&pool).await?;
    db::migrations::verify_required_schema(&pool).await?;

    if report.preinitialized {
        println!("pre-initialized database detected; ledger back-filled");
    }
    for filename in &report.applied {
        println!("applied {filename}");
    }
    println!("{} applied, {} already current", report.applied.len(), report.skipped);
    pool.close().await;
    Ok(())
}
