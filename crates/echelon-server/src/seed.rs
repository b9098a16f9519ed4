//! Loads accounts and tanks from a TOML file into the in-memory database.
//!
//! ```toml
//! [[account]]
//! name = "alice"
//! password = "plaintext, hashed on load"
//! level = 0
//! points = 120
//!
//! [[account.tank]]
//! name = "Crusher"
//! weapon_id = 1
//! speed_factor = 1.0
//! armor_factor = 1.0
//! color = 0xff0000
//! points = 0
//! ```
//!
//! `password_hash` (an `algorithm$salt$hexdigest` string) can be given
//! instead of `password`.

use std::path::Path;

use echelon::password::hash_password;
use echelon_protocol::{TankAttributes, UserLevel};
use echelon_store::{Database, MemoryDatabase, Statement, Value};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct SeedFile {
    #[serde(default, rename = "account")]
    accounts: Vec<SeedAccount>,
}

#[derive(Debug, Deserialize)]
struct SeedAccount {
    name: String,
    password: Option<String>,
    password_hash: Option<String>,
    #[serde(default)]
    level: i32,
    #[serde(default)]
    points: u64,
    #[serde(default, rename = "tank")]
    tanks: Vec<TankAttributes>,
}

/// Reads `path` and inserts every account it lists. Returns how many
/// accounts were loaded.
pub async fn load_accounts(
    database: &MemoryDatabase,
    path: &Path,
) -> Result<usize, Box<dyn std::error::Error>> {
    let content = tokio::fs::read_to_string(path).await?;
    let seed: SeedFile = toml::from_str(&content)?;

    for account in &seed.accounts {
        let hash = match (&account.password, &account.password_hash) {
            (Some(password), None) if !password.is_empty() => hash_password(password),
            (None, Some(hash)) => hash.clone(),
            _ => {
                return Err(format!(
                    "account {}: exactly one of password or password_hash is required",
                    account.name
                )
                .into());
            }
        };

        database
            .insert_account(&account.name, &hash, UserLevel(account.level))
            .await;
        if account.points > 0 {
            let points = i64::try_from(account.points)?;
            database
                .execute(
                    Statement::UpdateAccountPoints,
                    &[Value::Int(points), Value::from(account.name.as_str())],
                )
                .await?;
        }
        for tank in &account.tanks {
            database.insert_tank(&account.name, tank.clone()).await;
        }
    }

    tracing::info!(path = %path.display(), accounts = seed.accounts.len(), "accounts loaded");
    Ok(seed.accounts.len())
}
