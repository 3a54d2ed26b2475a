use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "block_rules")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Exact IP address matcher
    pub ip_address: Option<String>,

    /// CIDR network matcher, stored textually ("198.51.100.0/24")
    pub network: Option<String>,

    /// Case-insensitive User-Agent substring matcher
    pub user_agent: Option<String>,

    /// Why this rule exists
    pub reason: String,

    /// Number of requests this rule has rejected
    pub hit_count: i64,

    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter)]
pub enum Relation {}

impl RelationTrait for Relation {
    fn def(&self) -> RelationDef {
        panic!("No relations defined")
    }
}

impl ActiveModelBehavior for ActiveModel {}
