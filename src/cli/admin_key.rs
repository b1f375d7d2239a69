//! `agora admin-key` - mint an admin API key.
//!
//! The key is printed exactly once; only its keyed hash is stored.

use rand::RngCore;

use agora::config::Config;
use agora::crypto::CryptoRegistry;
use agora::db;
use agora::secrets::{KeyMaterial, SecretsProvider};
use agora::store::apikeys;

pub async fn execute(label: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env();
    let secrets = SecretsProvider::load(&config).await?;
    let keys = KeyMaterial::derive(&secrets)?;
    let registry = CryptoRegistry::from_kind(config.hasher);

    let pool = db::connect(&config.database_url).await?;
    db::migrations::run(&pool).await?;

    let mut raw = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut raw);
    let key = hex::encode(raw);
    let key_hash = registry.hash(&keys.api_key_hash, &[&key]);
    let id = apikeys::insert(&pool, &key_hash, label).await?;

    println!("created admin key {id} ({label})");
    println!("api key (shown once): {key}");
    pool.close().await;
    Ok(())
}
