//! `agora verify-chain` - offline recomputation of the audit chain.

use agora::chain;
use agora::config::Config;
use agora::db;

pub async fn execute() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env();
    let pool = db::connect(&config.database_url).await?;
    let verified = chain::verify_all(&pool).await?;
    println!("chain ok: {verified} entries verified");
    pool.close().await;
    Ok(())
}
