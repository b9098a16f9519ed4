//! Account management: self-service registration and the administrator
//! account operations.
//!
//! Renaming or re-levelling an account kicks its live sessions, so the
//! next login picks up the new values.

use echelon_protocol::{AccountEdit, AccountInfo, UserLevel};
use echelon_store::{Database, Row, Statement, StoreError};

use crate::auth::{LAST_LOGIN_FORMAT, int_column, is_valid_username};
use crate::password::hash_password;
use crate::{Echelon, ServiceError};

/// Deliberately loose: an `@` and a dot somewhere.
pub fn is_valid_email(email: &str) -> bool {
    email.contains('@') && email.contains('.')
}

fn validate_account(username: &str, email: &str) -> Result<(), ServiceError> {
    if !is_valid_username(username) {
        return Err(ServiceError::bad_information(
            "usernames contain only letters and digits",
        ));
    }
    if !is_valid_email(email) {
        return Err(ServiceError::bad_information("invalid e-mail address"));
    }
    Ok(())
}

/// Creates an account at `level`.
pub(crate) async fn create_account(
    database: &dyn Database,
    username: &str,
    password: &str,
    email: &str,
    level: UserLevel,
) -> Result<(), ServiceError> {
    validate_account(username, email)?;
    if password.is_empty() {
        return Err(ServiceError::bad_information("password cannot be empty"));
    }

    let created = chrono::Utc::now().format(LAST_LOGIN_FORMAT).to_string();
    let affected = database
        .execute(
            Statement::NewAccount,
            &[
                username.into(),
                hash_password(password).into(),
                created.into(),
                level.0.into(),
                email.into(),
            ],
        )
        .await?;
    if affected == 0 {
        return Err(ServiceError::bad_information("that account name already exists"));
    }

    tracing::info!(user = username, email, %level, "account created");
    Ok(())
}

fn account_from_row(row: &Row) -> Result<AccountInfo, StoreError> {
    Ok(AccountInfo {
        name: row.get_text(0)?.to_string(),
        email: row.get_text(1)?.to_string(),
        created: row.get_opt_text(2)?.map(str::to_string),
        last_login: row.get_opt_text(3)?.map(str::to_string),
        user_level: UserLevel(int_column(row, 4, "a 32-bit user level")?),
        points: int_column(row, 5, "non-negative account points")?,
    })
}

impl Echelon {
    pub async fn account_list(&self) -> Result<Vec<AccountInfo>, ServiceError> {
        let rows = self.database().query(Statement::GetAccountList, &[]).await?;
        let accounts = rows
            .iter()
            .map(account_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(accounts)
    }

    /// # Errors
    /// `BadInformation` if there is no such account.
    pub async fn account_by_name(&self, name: &str) -> Result<AccountInfo, ServiceError> {
        let rows = self
            .database()
            .query(Statement::GetAccountInfo, &[name.into()])
            .await?;
        let [row] = rows.as_slice() else {
            return Err(ServiceError::bad_information("that account does not exist"));
        };
        Ok(account_from_row(row)?)
    }

    /// Administrator registration, at any level.
    pub async fn create_account(
        &self,
        username: &str,
        password: &str,
        email: &str,
        level: UserLevel,
    ) -> Result<(), ServiceError> {
        create_account(self.database().as_ref(), username, password, email, level).await
    }

    /// Rewrites name, e-mail and level of `name`.
    ///
    /// # Errors
    /// `BadInformation` if the account does not exist, the new values are
    /// malformed, or the new name is taken.
    pub async fn edit_account(&self, name: &str, edit: AccountEdit) -> Result<(), ServiceError> {
        let current = self.account_by_name(name).await?;
        validate_account(&edit.name, &edit.email)?;

        let affected = self
            .database()
            .execute(
                Statement::UpdateAccount,
                &[
                    edit.name.as_str().into(),
                    edit.email.as_str().into(),
                    edit.user_level.0.into(),
                    name.into(),
                ],
            )
            .await?;
        if affected == 0 {
            return Err(ServiceError::bad_information("that account name already exists"));
        }

        let kicked = if edit.name != current.name || edit.user_level != current.user_level {
            self.registry().remove_user(name).await.len()
        } else {
            0
        };
        tracing::info!(user = name, new_name = %edit.name, level = %edit.user_level, kicked, "account edited");
        Ok(())
    }

    pub async fn set_account_password(&self, name: &str, password: &str) -> Result<(), ServiceError> {
        if password.is_empty() {
            return Err(ServiceError::bad_information("password cannot be empty"));
        }
        let affected = self
            .database()
            .execute(
                Statement::UpdatePassword,
                &[hash_password(password).into(), name.into()],
            )
            .await?;
        if affected == 0 {
            return Err(ServiceError::bad_information("that account does not exist"));
        }
        tracing::info!(user = name, "password changed");
        Ok(())
    }

    /// Deletes the account with its tanks and kicks it if online.
    pub async fn delete_account(&self, name: &str) -> Result<(), ServiceError> {
        let affected = self
            .database()
            .execute(Statement::DeleteAccount, &[name.into()])
            .await?;
        if affected == 0 {
            return Err(ServiceError::bad_information("that account does not exist"));
        }
        let kicked = self.registry().remove_user(name).await.len();
        tracing::info!(user = name, kicked, "account deleted");
        Ok(())
    }
}
