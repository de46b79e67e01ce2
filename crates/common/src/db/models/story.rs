//! Story entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Editorial state of a story
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "i32", db_type = "Integer")]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    /// Generated, awaiting review
    #[sea_orm(num_value = 0)]
    Pending,
    /// Published to the reader app
    #[sea_orm(num_value = 1)]
    Uploaded,
    #[sea_orm(num_value = 2)]
    Complete,
}

impl ReviewStatus {
    /// Numeric value stored in the `status` column
    pub fn code(self) -> i32 {
        match self {
            ReviewStatus::Pending => 0,
            ReviewStatus::Uploaded => 1,
            ReviewStatus::Complete => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(ReviewStatus::Pending),
            1 => Some(ReviewStatus::Uploaded),
            2 => Some(ReviewStatus::Complete),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "story")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(column_type = "Text")]
    pub title: String,

    #[sea_orm(column_type = "Text")]
    pub author: String,

    #[sea_orm(column_type = "Text")]
    pub description: String,

    /// Background music style suggested by the text model
    #[sea_orm(column_type = "Text")]
    pub music_style: String,

    pub status: ReviewStatus,

    pub created_at: DateTimeUtc,

    pub updated_at: DateTimeUtc,

    /// Soft delete marker, never set by the generator
    pub deleted_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::chapter::Entity")]
    Chapters,
}

impl Related<super::chapter::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Chapters.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
