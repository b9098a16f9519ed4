//! Tank management for players: create, update, delete, and rank lookups.
//!
//! Every write reloads the player's tank list from storage, so the
//! session never holds a tank the database does not.

use echelon_protocol::TankAttributes;
use echelon_session::Session;
use echelon_store::Statement;

use crate::auth::{is_valid_username, load_tanks};
use crate::rank::rank_from_points;
use crate::{Echelon, ServiceError};

/// Allowed range of the speed and armor factors.
pub const FACTOR_RANGE: std::ops::RangeInclusive<f32> = 0.5..=1.5;

/// Most tanks one `GetRanksOfTanks` may ask about.
pub const MAX_RANK_LOOKUPS: usize = 64;

const BALANCE_TOLERANCE: f64 = 0.001;

/// Tank names follow the username rule: ASCII letters and digits.
pub fn validate_tank_name(name: &str) -> Result<(), ServiceError> {
    if !is_valid_username(name) {
        return Err(ServiceError::bad_information(
            "tank name contains invalid characters",
        ));
    }
    Ok(())
}

fn round2(factor: f32) -> f64 {
    (f64::from(factor) * 100.0).round() / 100.0
}

/// What a tank may be built from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TankRules {
    /// Known weapon ids. Empty accepts any non-negative id.
    pub weapons: Vec<i32>,
}

impl TankRules {
    /// Checks weapon and factors. Speed and armor have to sit the same
    /// distance from 1.0, in opposite directions or not.
    pub fn validate(&self, tank: &TankAttributes) -> Result<(), ServiceError> {
        let known = if self.weapons.is_empty() {
            tank.weapon_id >= 0
        } else {
            self.weapons.contains(&tank.weapon_id)
        };
        if !known {
            return Err(ServiceError::bad_information("bad weapon id"));
        }

        if !FACTOR_RANGE.contains(&tank.speed_factor) || !FACTOR_RANGE.contains(&tank.armor_factor) {
            return Err(ServiceError::bad_information(
                "minimum/maximum allowed speed/armor breached",
            ));
        }

        let speed = (1.0 - round2(tank.speed_factor)).abs();
        let armor = (1.0 - round2(tank.armor_factor)).abs();
        if (speed - armor).abs() > BALANCE_TOLERANCE {
            return Err(ServiceError::bad_information(
                "speed and armor must be the same distance from 100%",
            ));
        }
        Ok(())
    }
}

impl Echelon {
    /// # Errors
    /// `BadInformation` for a malformed tank or a name in use by anyone.
    pub async fn create_tank(&self, session: &Session, tank: TankAttributes) -> Result<(), ServiceError> {
        validate_tank_name(&tank.name)?;
        self.tank_rules().validate(&tank)?;
        if self.tank_owner(&tank.name).await?.is_some() {
            return Err(ServiceError::bad_information("tank name already exists"));
        }

        let affected = self
            .database()
            .execute(
                Statement::NewTank,
                &[
                    tank.name.as_str().into(),
                    session.owner_name.as_str().into(),
                    tank.weapon_id.into(),
                    f64::from(tank.speed_factor).into(),
                    f64::from(tank.armor_factor).into(),
                    tank.color.into(),
                ],
            )
            .await?;
        if affected == 0 {
            return Err(ServiceError::bad_information("tank name already exists"));
        }

        tracing::info!(user = %session.owner_name, tank = %tank.name, weapon = tank.weapon_id, "tank created");
        self.refresh_tanks(session).await
    }

    /// Rewrites weapon, factors and color of `old_name`. The name stays.
    ///
    /// # Errors
    /// `BadInformation` if the caller does not own `old_name` or the new
    /// attributes are malformed.
    pub async fn update_tank(
        &self,
        session: &Session,
        old_name: &str,
        tank: TankAttributes,
    ) -> Result<(), ServiceError> {
        self.ensure_owned(session, old_name).await?;
        validate_tank_name(&tank.name)?;
        self.tank_rules().validate(&tank)?;

        let affected = self
            .database()
            .execute(
                Statement::UpdateTank,
                &[
                    tank.weapon_id.into(),
                    f64::from(tank.speed_factor).into(),
                    f64::from(tank.armor_factor).into(),
                    tank.color.into(),
                    old_name.into(),
                ],
            )
            .await?;
        if affected == 0 {
            return Err(ServiceError::bad_information("that tank does not exist"));
        }

        tracing::info!(user = %session.owner_name, tank = old_name, "tank updated");
        self.refresh_tanks(session).await
    }

    /// # Errors
    /// - `BadInformation` if the caller does not own the tank.
    /// - `State` if it is the tank the player is driving in a game.
    pub async fn delete_tank(&self, session: &Session, tank_name: &str) -> Result<(), ServiceError> {
        self.ensure_owned(session, tank_name).await?;
        let driving = session.player().is_some_and(|p| {
            p.in_game() && p.active_tank().is_some_and(|t| t.name == tank_name)
        });
        if driving {
            return Err(ServiceError::State("cannot delete the tank in play".into()));
        }

        let affected = self
            .database()
            .execute(Statement::DeleteTank, &[tank_name.into()])
            .await?;
        if affected == 0 {
            return Err(ServiceError::bad_information("that tank does not exist"));
        }

        tracing::info!(user = %session.owner_name, tank = tank_name, "tank deleted");
        self.refresh_tanks(session).await
    }

    /// Rank of each named tank, in order; `-1` for a tank that does not
    /// exist.
    pub async fn ranks_of_tanks(&self, tank_names: &[String]) -> Result<Vec<i32>, ServiceError> {
        if tank_names.len() > MAX_RANK_LOOKUPS {
            return Err(ServiceError::bad_information(format!(
                "at most {MAX_RANK_LOOKUPS} tanks per request"
            )));
        }

        let mut ranks = Vec::with_capacity(tank_names.len());
        for name in tank_names {
            let rows = self
                .database()
                .query(Statement::GetTankPoints, &[name.as_str().into()])
                .await?;
            let rank = match rows.first() {
                Some(row) => {
                    let points = u64::try_from(row.get_i64(0)?).unwrap_or(0);
                    i32::try_from(rank_from_points(points)).unwrap_or(i32::MAX)
                }
                None => -1,
            };
            ranks.push(rank);
        }
        Ok(ranks)
    }

    async fn tank_owner(&self, tank_name: &str) -> Result<Option<String>, ServiceError> {
        let rows = self
            .database()
            .query(Statement::GetAccountFromTank, &[tank_name.into()])
            .await?;
        match rows.first() {
            Some(row) => Ok(Some(row.get_text(0)?.to_string())),
            None => Ok(None),
        }
    }

    async fn ensure_owned(&self, session: &Session, tank_name: &str) -> Result<(), ServiceError> {
        match self.tank_owner(tank_name).await? {
            Some(owner) if owner == session.owner_name => Ok(()),
            _ => {
                tracing::info!(user = %session.owner_name, tank = tank_name, "tank not owned by caller");
                Err(ServiceError::bad_information("that tank does not exist"))
            }
        }
    }

    async fn refresh_tanks(&self, session: &Session) -> Result<(), ServiceError> {
        let tanks = load_tanks(self.database().as_ref(), &session.owner_name).await?;
        self.registry()
            .update_player(session.id, |p| p.replace_tanks(tanks))
            .await?;
        Ok(())
    }
}
