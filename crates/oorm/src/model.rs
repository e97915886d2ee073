use chrono::NaiveDateTime;
use facet::Facet;
use oorm_schema::Record;

/// Common columns for embedding: an auto-increment id, write timestamps and a
/// soft-delete marker.
///
/// ```
/// use facet::Facet;
/// use oorm::{Model, Record};
///
/// #[derive(Debug, Clone, Default, Facet)]
/// struct Post {
///     #[facet(oorm::embed)]
///     model: Model,
///     #[facet(oorm::tag = "size:200")]
///     title: String,
/// }
///
/// impl Record for Post {}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Facet)]
pub struct Model {
    #[facet(oorm::tag = "autoIncrement")]
    pub id: u64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    #[facet(oorm::tag = "index")]
    pub deleted_at: Option<NaiveDateTime>,
}

impl Record for Model {}

impl Model {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}
