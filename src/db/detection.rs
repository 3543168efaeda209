use sea_orm::entity::prelude::*;
use sea_orm::QueryOrder;

#[derive(Debug, Clone, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "detections")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub timestamp: String,
    pub weapon_type: String,
    pub confidence: f64,
    pub camera_id: String,
    pub image_path: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Entity {
    pub fn find_newest_first() -> Select<Self> {
        Self::find().order_by_desc(Column::Timestamp)
    }
}
