//! An in-memory [`Database`], for tests, the self-test, and small
//! deployments seeded from a file.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use echelon_protocol::{MatchStatistics, TankAttributes, UserLevel};
use tokio::sync::RwLock;

use crate::{Database, Row, Statement, StoreError, Value};

/// Stored account columns.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountRecord {
    pub password_hash: String,
    pub user_level: UserLevel,
    pub points: i64,
    pub last_login: Option<String>,
    pub email: String,
    pub created: Option<String>,
}

#[derive(Debug, Clone)]
struct TankRecord {
    owner: String,
    attributes: TankAttributes,
    statistics: MatchStatistics,
}

#[derive(Debug, Default)]
struct Tables {
    accounts: HashMap<String, AccountRecord>,
    /// Ordered so tank lists come back in a stable order.
    tanks: BTreeMap<String, TankRecord>,
}

/// All tables in maps behind one lock.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    tables: RwLock<Tables>,
    writes: AtomicU64,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_account(&self, name: &str, password_hash: &str, user_level: UserLevel) {
        self.tables.write().await.accounts.insert(
            name.to_string(),
            AccountRecord {
                password_hash: password_hash.to_string(),
                user_level,
                points: 0,
                last_login: None,
                email: String::new(),
                created: None,
            },
        );
    }

    /// Adds a tank owned by `owner`, with zeroed statistics.
    pub async fn insert_tank(&self, owner: &str, attributes: TankAttributes) {
        let statistics = MatchStatistics {
            tank_name: attributes.name.clone(),
            ..MatchStatistics::default()
        };
        self.tables.write().await.tanks.insert(
            attributes.name.clone(),
            TankRecord {
                owner: owner.to_string(),
                attributes,
                statistics,
            },
        );
    }

    pub async fn account(&self, name: &str) -> Option<AccountRecord> {
        self.tables.read().await.accounts.get(name).cloned()
    }

    /// The stored attributes and owner of a tank.
    pub async fn tank(&self, tank: &str) -> Option<(String, TankAttributes)> {
        self.tables
            .read()
            .await
            .tanks
            .get(tank)
            .map(|t| (t.owner.clone(), t.attributes.clone()))
    }

    pub async fn tank_statistics(&self, tank: &str) -> Option<MatchStatistics> {
        self.tables
            .read()
            .await
            .tanks
            .get(tank)
            .map(|t| t.statistics.clone())
    }

    /// Number of `execute` calls so far, successful or not.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

fn text(statement: Statement, args: &[Value], index: usize) -> Result<&str, StoreError> {
    args[index].as_text().ok_or(StoreError::Argument {
        statement,
        index,
        expected: "text",
    })
}

fn int(statement: Statement, args: &[Value], index: usize) -> Result<i64, StoreError> {
    args[index].as_i64().ok_or(StoreError::Argument {
        statement,
        index,
        expected: "an integer",
    })
}

fn float(statement: Statement, args: &[Value], index: usize) -> Result<f64, StoreError> {
    args[index].as_f64().ok_or(StoreError::Argument {
        statement,
        index,
        expected: "a number",
    })
}

fn level(statement: Statement, args: &[Value], index: usize) -> Result<UserLevel, StoreError> {
    i32::try_from(int(statement, args, index)?)
        .map(UserLevel)
        .map_err(|_| StoreError::Argument {
            statement,
            index,
            expected: "a 32-bit integer",
        })
}

/// Tank attribute columns in `NewTank` / `UpdateTank` order, starting at
/// `first`: weapon, speed, armor, color.
fn tank_columns(
    statement: Statement,
    args: &[Value],
    first: usize,
) -> Result<(i32, f32, f32, u32), StoreError> {
    let weapon = i32::try_from(int(statement, args, first)?).map_err(|_| StoreError::Argument {
        statement,
        index: first,
        expected: "a 32-bit weapon id",
    })?;
    let color = u32::try_from(int(statement, args, first + 3)?).map_err(|_| StoreError::Argument {
        statement,
        index: first + 3,
        expected: "a 32-bit color",
    })?;
    // Factors are validated to 0.5..=1.5 before they get here.
    let speed = float(statement, args, first + 1)? as f32;
    let armor = float(statement, args, first + 2)? as f32;
    Ok((weapon, speed, armor, color))
}

fn account_row(name: &str, a: &AccountRecord) -> Row {
    Row(vec![
        name.into(),
        a.email.clone().into(),
        a.created.clone().into(),
        a.last_login.clone().into(),
        a.user_level.0.into(),
        a.points.into(),
    ])
}

/// Statistics counters are stored as `u32`; out-of-range values saturate.
fn counter(statement: Statement, args: &[Value], index: usize) -> Result<u32, StoreError> {
    let v = int(statement, args, index)?;
    Ok(v.clamp(0, i64::from(u32::MAX)) as u32)
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn query(&self, statement: Statement, args: &[Value]) -> Result<Vec<Row>, StoreError> {
        statement.check_arity(args)?;
        let tables = self.tables.read().await;

        let rows = match statement {
            Statement::GetAccount => {
                let name = text(statement, args, 0)?;
                tables
                    .accounts
                    .get(name)
                    .map(|a| {
                        Row(vec![
                            name.into(),
                            a.password_hash.clone().into(),
                            a.user_level.0.into(),
                        ])
                    })
                    .into_iter()
                    .collect()
            }
            Statement::GetTankList => {
                let owner = text(statement, args, 0)?;
                tables
                    .tanks
                    .values()
                    .filter(|t| t.owner == owner)
                    .map(|t| {
                        let a = &t.attributes;
                        Row(vec![
                            a.name.clone().into(),
                            a.weapon_id.into(),
                            f64::from(a.speed_factor).into(),
                            f64::from(a.armor_factor).into(),
                            a.color.into(),
                            Value::Int(i64::try_from(a.points).unwrap_or(i64::MAX)),
                        ])
                    })
                    .collect()
            }
            Statement::GetTankStatistics => {
                let tank = text(statement, args, 0)?;
                tables
                    .tanks
                    .get(tank)
                    .map(|t| {
                        let s = &t.statistics;
                        Row(vec![
                            s.kills.into(),
                            s.assists.into(),
                            s.deaths.into(),
                            s.objectives_completed.into(),
                            s.objectives_captured.into(),
                        ])
                    })
                    .into_iter()
                    .collect()
            }
            Statement::GetAccountFromTank => {
                let tank = text(statement, args, 0)?;
                tables
                    .tanks
                    .get(tank)
                    .map(|t| Row(vec![t.owner.clone().into()]))
                    .into_iter()
                    .collect()
            }
            Statement::GetTankPoints => {
                let tank = text(statement, args, 0)?;
                tables
                    .tanks
                    .get(tank)
                    .map(|t| {
                        let points = i64::try_from(t.attributes.points).unwrap_or(i64::MAX);
                        Row(vec![points.into()])
                    })
                    .into_iter()
                    .collect()
            }
            Statement::GetAccountPoints => {
                let name = text(statement, args, 0)?;
                tables
                    .accounts
                    .get(name)
                    .map(|a| Row(vec![a.points.into()]))
                    .into_iter()
                    .collect()
            }
            Statement::GetAccountList => {
                let mut rows: Vec<Row> = tables
                    .accounts
                    .iter()
                    .map(|(name, a)| account_row(name, a))
                    .collect();
                rows.sort_by(|a, b| a.0[0].as_text().cmp(&b.0[0].as_text()));
                rows
            }
            Statement::GetAccountInfo => {
                let name = text(statement, args, 0)?;
                tables
                    .accounts
                    .get(name)
                    .map(|a| account_row(name, a))
                    .into_iter()
                    .collect()
            }
            other => return Err(StoreError::Unsupported(other)),
        };
        Ok(rows)
    }

    async fn execute(&self, statement: Statement, args: &[Value]) -> Result<u64, StoreError> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        statement.check_arity(args)?;
        let mut tables = self.tables.write().await;

        let affected = match statement {
            Statement::UpdateLastLogin => {
                let stamp = text(statement, args, 0)?.to_string();
                let name = text(statement, args, 1)?;
                tables
                    .accounts
                    .get_mut(name)
                    .map(|a| a.last_login = Some(stamp))
                    .is_some()
            }
            Statement::UpdateTankStatistics => {
                let tank = text(statement, args, 5)?;
                let kills = counter(statement, args, 0)?;
                let assists = counter(statement, args, 1)?;
                let deaths = counter(statement, args, 2)?;
                let completed = counter(statement, args, 3)?;
                let captured = counter(statement, args, 4)?;
                tables
                    .tanks
                    .get_mut(tank)
                    .map(|t| {
                        let s = &mut t.statistics;
                        s.kills = kills;
                        s.assists = assists;
                        s.deaths = deaths;
                        s.objectives_completed = completed;
                        s.objectives_captured = captured;
                    })
                    .is_some()
            }
            Statement::UpdateAccountPoints => {
                let points = int(statement, args, 0)?;
                let name = text(statement, args, 1)?;
                tables
                    .accounts
                    .get_mut(name)
                    .map(|a| a.points = points)
                    .is_some()
            }
            Statement::SetUserLevel => {
                let user_level = level(statement, args, 0)?;
                let name = text(statement, args, 1)?;
                tables
                    .accounts
                    .get_mut(name)
                    .map(|a| a.user_level = user_level)
                    .is_some()
            }
            Statement::NewTank => {
                let name = text(statement, args, 0)?;
                let owner = text(statement, args, 1)?;
                let (weapon_id, speed_factor, armor_factor, color) = tank_columns(statement, args, 2)?;
                if tables.tanks.contains_key(name) || !tables.accounts.contains_key(owner) {
                    false
                } else {
                    tables.tanks.insert(
                        name.to_string(),
                        TankRecord {
                            owner: owner.to_string(),
                            attributes: TankAttributes {
                                name: name.to_string(),
                                weapon_id,
                                speed_factor,
                                armor_factor,
                                color,
                                points: 0,
                            },
                            statistics: MatchStatistics {
                                tank_name: name.to_string(),
                                ..MatchStatistics::default()
                            },
                        },
                    );
                    true
                }
            }
            Statement::UpdateTank => {
                let (weapon_id, speed_factor, armor_factor, color) = tank_columns(statement, args, 0)?;
                let name = text(statement, args, 4)?;
                tables
                    .tanks
                    .get_mut(name)
                    .map(|t| {
                        let a = &mut t.attributes;
                        a.weapon_id = weapon_id;
                        a.speed_factor = speed_factor;
                        a.armor_factor = armor_factor;
                        a.color = color;
                    })
                    .is_some()
            }
            Statement::DeleteTank => {
                let name = text(statement, args, 0)?;
                tables.tanks.remove(name).is_some()
            }
            Statement::NewAccount => {
                let name = text(statement, args, 0)?;
                let password_hash = text(statement, args, 1)?.to_string();
                let created = text(statement, args, 2)?.to_string();
                let user_level = level(statement, args, 3)?;
                let email = text(statement, args, 4)?.to_string();
                if tables.accounts.contains_key(name) {
                    false
                } else {
                    tables.accounts.insert(
                        name.to_string(),
                        AccountRecord {
                            password_hash,
                            user_level,
                            points: 0,
                            last_login: None,
                            email,
                            created: Some(created),
                        },
                    );
                    true
                }
            }
            Statement::UpdateAccount => {
                let new_name = text(statement, args, 0)?;
                let email = text(statement, args, 1)?.to_string();
                let user_level = level(statement, args, 2)?;
                let name = text(statement, args, 3)?;
                let taken = new_name != name && tables.accounts.contains_key(new_name);
                match tables.accounts.remove(name) {
                    Some(record) if taken => {
                        tables.accounts.insert(name.to_string(), record);
                        false
                    }
                    Some(mut record) => {
                        record.email = email;
                        record.user_level = user_level;
                        tables.accounts.insert(new_name.to_string(), record);
                        for tank in tables.tanks.values_mut().filter(|t| t.owner == name) {
                            tank.owner = new_name.to_string();
                        }
                        true
                    }
                    None => false,
                }
            }
            Statement::UpdatePassword => {
                let password_hash = text(statement, args, 0)?.to_string();
                let name = text(statement, args, 1)?;
                tables
                    .accounts
                    .get_mut(name)
                    .map(|a| a.password_hash = password_hash)
                    .is_some()
            }
            Statement::DeleteAccount => {
                let name = text(statement, args, 0)?;
                let removed = tables.accounts.remove(name).is_some();
                if removed {
                    tables.tanks.retain(|_, t| t.owner != name);
                }
                removed
            }
            other => return Err(StoreError::Unsupported(other)),
        };

        tracing::trace!(%statement, affected, "memory database write");
        Ok(u64::from(affected))
    }
}

// =========================================================================
// Tests
// =========================================================================
