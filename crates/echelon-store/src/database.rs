//! The database contract: named, parameterized statements.
//!
//! The core never builds query text. It names a [`Statement`] and passes
//! positional [`Value`]s; a backend decides what the statement means in
//! its own storage. Results come back as [`Row`]s of [`Value`]s.
//!
//! | Statement               | Arguments                                    | Rows                                       |
//! |-------------------------|----------------------------------------------|--------------------------------------------|
//! | `GetAccount`            | account                                      | name, password hash, user level            |
//! | `UpdateLastLogin`       | timestamp, account                           |                                            |
//! | `GetTankList`           | account                                      | name, weapon, speed, armor, color, points  |
//! | `GetTankStatistics`     | tank                                         | kills, assists, deaths, completed, captured|
//! | `UpdateTankStatistics`  | kills, assists, deaths, completed, captured, tank |                                       |
//! | `GetAccountFromTank`    | tank                                         | account                                    |
//! | `GetTankPoints`         | tank                                         | points                                     |
//! | `GetAccountPoints`      | account                                      | points                                     |
//! | `UpdateAccountPoints`   | points, account                              |                                            |
//! | `SetUserLevel`          | level, account                               |                                            |
//! | `NewTank`               | tank, account, weapon, speed, armor, color   |                                            |
//! | `UpdateTank`            | weapon, speed, armor, color, tank            |                                            |
//! | `DeleteTank`            | tank                                         |                                            |
//! | `GetAccountList`        |                                              | name, email, created, last login, level, points |
//! | `GetAccountInfo`        | account                                      | name, email, created, last login, level, points |
//! | `NewAccount`            | account, password hash, created, level, email|                                            |
//! | `UpdateAccount`         | new name, email, level, account              |                                            |
//! | `UpdatePassword`        | password hash, account                       |                                            |
//! | `DeleteAccount`         | account                                      |                                            |
//!
//! `NewTank` also creates the tank's zeroed statistics; `DeleteTank` and
//! `DeleteAccount` remove everything that hangs off the deleted row.
//! Writes that would collide with an existing name affect no rows.

use std::fmt;

use async_trait::async_trait;

use crate::StoreError;

/// Every statement the core issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Statement {
    GetAccount,
    UpdateLastLogin,
    GetTankList,
    GetTankStatistics,
    UpdateTankStatistics,
    GetAccountFromTank,
    GetTankPoints,
    GetAccountPoints,
    UpdateAccountPoints,
    SetUserLevel,
    NewTank,
    UpdateTank,
    DeleteTank,
    GetAccountList,
    GetAccountInfo,
    NewAccount,
    UpdateAccount,
    UpdatePassword,
    DeleteAccount,
}

impl Statement {
    /// Number of positional arguments the statement takes.
    pub fn arity(self) -> usize {
        match self {
            Statement::GetAccountList => 0,
            Statement::GetAccount
            | Statement::GetTankList
            | Statement::GetTankStatistics
            | Statement::GetAccountFromTank
            | Statement::GetTankPoints
            | Statement::GetAccountPoints
            | Statement::DeleteTank
            | Statement::GetAccountInfo
            | Statement::DeleteAccount => 1,
            Statement::UpdateLastLogin
            | Statement::UpdateAccountPoints
            | Statement::SetUserLevel
            | Statement::UpdatePassword => 2,
            Statement::UpdateAccount => 4,
            Statement::UpdateTank | Statement::NewAccount => 5,
            Statement::UpdateTankStatistics | Statement::NewTank => 6,
        }
    }

    /// Fails with [`StoreError::Arity`] unless `args` has the right length.
    pub fn check_arity(self, args: &[Value]) -> Result<(), StoreError> {
        if args.len() == self.arity() {
            Ok(())
        } else {
            Err(StoreError::Arity {
                statement: self,
                expected: self.arity(),
                got: args.len(),
            })
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ---------------------------------------------------------------------------
// Values and rows
// ---------------------------------------------------------------------------

/// One argument or column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<Option<String>> for Value {
    fn from(v: Option<String>) -> Self {
        v.map_or(Value::Null, Value::Text)
    }
}

/// One result row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row(pub Vec<Value>);

impl Row {
    fn column(&self, index: usize) -> Result<&Value, StoreError> {
        self.0.get(index).ok_or(StoreError::MissingColumn(index))
    }

    pub fn get_i64(&self, index: usize) -> Result<i64, StoreError> {
        self.column(index)?.as_i64().ok_or(StoreError::ColumnType {
            index,
            expected: "an integer",
        })
    }

    pub fn get_f64(&self, index: usize) -> Result<f64, StoreError> {
        self.column(index)?.as_f64().ok_or(StoreError::ColumnType {
            index,
            expected: "a number",
        })
    }

    pub fn get_text(&self, index: usize) -> Result<&str, StoreError> {
        self.column(index)?.as_text().ok_or(StoreError::ColumnType {
            index,
            expected: "text",
        })
    }

    /// Text that may be `NULL`.
    pub fn get_opt_text(&self, index: usize) -> Result<Option<&str>, StoreError> {
        match self.column(index)? {
            Value::Null => Ok(None),
            value => value.as_text().map(Some).ok_or(StoreError::ColumnType {
                index,
                expected: "text or null",
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

/// Request/response access to persistent storage.
///
/// Implementations serialize their own statement execution; callers treat
/// the database as one logical resource and never pipeline.
#[async_trait]
pub trait Database: Send + Sync + 'static {
    /// Runs a reading statement.
    async fn query(&self, statement: Statement, args: &[Value]) -> Result<Vec<Row>, StoreError>;

    /// Runs a writing statement and returns the number of rows affected.
    async fn execute(&self, statement: Statement, args: &[Value]) -> Result<u64, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_arity_wrong_count_returns_error() {
        let err = Statement::UpdateAccountPoints
            .check_arity(&[Value::Int(1)])
            .unwrap_err();

        assert!(matches!(
            err,
            StoreError::Arity { expected: 2, got: 1, .. }
        ));
    }

    #[test]
    fn test_row_getters_check_types() {
        let row = Row(vec!["alice".into(), Value::Int(20), Value::Float(1.5)]);

        assert_eq!(row.get_text(0).unwrap(), "alice");
        assert_eq!(row.get_i64(1).unwrap(), 20);
        assert_eq!(row.get_f64(1).unwrap(), 20.0);
        assert_eq!(row.get_f64(2).unwrap(), 1.5);
        assert!(matches!(row.get_i64(0), Err(StoreError::ColumnType { index: 0, .. })));
        assert!(matches!(row.get_text(5), Err(StoreError::MissingColumn(5))));
    }

    #[test]
    fn test_get_opt_text_null_is_none() {
        let row = Row(vec![Value::Null, "2024-01-01 00:00:00".into(), Value::Int(3)]);

        assert_eq!(row.get_opt_text(0).unwrap(), None);
        assert_eq!(row.get_opt_text(1).unwrap(), Some("2024-01-01 00:00:00"));
        assert!(matches!(row.get_opt_text(2), Err(StoreError::ColumnType { index: 2, .. })));
    }

    #[test]
    fn test_get_account_list_takes_no_arguments() {
        assert!(Statement::GetAccountList.check_arity(&[]).is_ok());
        assert!(Statement::NewTank.check_arity(&vec![Value::Null; 5]).is_err());
    }
}
