mod error;
mod http;

pub use error::{CatalogError, CatalogResult};
pub use http::HttpQuizCatalog;

use futures::future::BoxFuture;
use serde::Deserialize;
use uuid::Uuid;

use crate::dto::quiz::{InstanceInfo, InstanceStatus, QuestionSpec};

/// Instance record plus its ordered questions, as returned by lookups.
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceBundle {
    pub instance: InstanceInfo,
    pub questions: Vec<QuestionSpec>,
}

/// Client surface of the quiz catalog service, plus the instance status
/// writer the hub drives through the quiz lifecycle.
///
/// Lookups are access-checked by the catalog: an unknown id or code yields
/// [`CatalogError::NotFound`], a caller without access
/// [`CatalogError::Forbidden`].
pub trait QuizCatalog: Send + Sync {
    fn get_instance(
        &self,
        instance_id: Uuid,
        user_id: Uuid,
    ) -> BoxFuture<'static, CatalogResult<InstanceBundle>>;

    fn get_instance_by_access_code(
        &self,
        access_code: String,
        user_id: Uuid,
    ) -> BoxFuture<'static, CatalogResult<InstanceBundle>>;

    fn update_instance_status(
        &self,
        instance_id: Uuid,
        status: InstanceStatus,
    ) -> BoxFuture<'static, CatalogResult<()>>;
}
