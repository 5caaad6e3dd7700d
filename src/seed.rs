//! Baseline user accounts.

use crate::database::DatabaseFacade;
use crate::errors::DbError;
use crate::query::FilterExpression;
use crate::schema::SeedComponent;
use async_trait::async_trait;
use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

pub const USER_ACCOUNTS: &str = "UserAccounts";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserRole {
    pub role_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserAccount {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    #[serde(default)]
    pub email_address: Option<String>,
    pub user_name: String,
    pub first_name: String,
    pub last_name: String,
    pub salutation: String,
    #[serde(default)]
    pub is_staff: bool,
    #[serde(default)]
    pub user_role: Option<UserRole>,
}

impl UserAccount {
    pub fn new(
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        salutation: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        let first_name = first_name.into();
        Self {
            id: None,
            email_address: None,
            user_name: first_name.clone(),
            first_name,
            last_name: last_name.into(),
            salutation: salutation.into(),
            is_staff: false,
            user_role: Some(UserRole { role_name: role.into() }),
        }
    }
}

/// Ensures each baseline account exists, matched by first and last name. An existing account
/// without a role gets the baseline role; anything else about it is left alone.
#[derive(Debug, Clone)]
pub struct UserSeed {
    accounts: Vec<UserAccount>,
}

impl Default for UserSeed {
    fn default() -> Self {
        Self {
            accounts: vec![
                UserAccount::new("Danielle", "Summers", "Miss", "Owner"),
                UserAccount::new("Anna", "Tierney", "Miss", "PowerUser"),
            ],
        }
    }
}

impl UserSeed {
    #[must_use]
    pub const fn with_accounts(accounts: Vec<UserAccount>) -> Self {
        Self { accounts }
    }

    #[must_use]
    pub fn accounts(&self) -> &[UserAccount] {
        &self.accounts
    }
}

#[async_trait]
impl SeedComponent for UserSeed {
    fn name(&self) -> &str {
        "Users"
    }

    async fn seed(&self, db: &DatabaseFacade) -> Result<(), DbError> {
        for baseline in &self.accounts {
            let (first, last) = (baseline.first_name.clone(), baseline.last_name.clone());
            let same_person =
                FilterExpression::matching(move |u: &UserAccount| u.first_name == first && u.last_name == last);
            match db.read_first_or_default(USER_ACCOUNTS, &same_person).await? {
                None => {
                    db.insert(USER_ACCOUNTS, baseline).await?;
                    log::info!("seeded user {} {}", baseline.first_name, baseline.last_name);
                }
                Some(mut existing) if existing.user_role.is_none() => {
                    existing.user_role.clone_from(&baseline.user_role);
                    db.write(USER_ACCOUNTS, &existing).await?;
                    log::info!("restored role of user {} {}", existing.first_name, existing.last_name);
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}
