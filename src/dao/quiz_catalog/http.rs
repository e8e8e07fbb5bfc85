use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use uuid::Uuid;

use super::{
    InstanceBundle, QuizCatalog,
    error::{CatalogError, CatalogResult},
};
use crate::{config::UPSTREAM_TIMEOUT, dto::quiz::InstanceStatus};

/// HTTP client for the quiz catalog service.
#[derive(Clone)]
pub struct HttpQuizCatalog {
    client: Client,
    base_url: Arc<str>,
}

#[derive(Serialize)]
struct StatusBody {
    status: InstanceStatus,
}

impl HttpQuizCatalog {
    pub fn new(base_url: impl AsRef<str>) -> CatalogResult<Self> {
        let client = Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .build()
            .map_err(|source| CatalogError::ClientBuilder { source })?;

        Ok(Self {
            client,
            base_url: Arc::<str>::from(base_url.as_ref().trim_end_matches('/')),
        })
    }

    async fn fetch_bundle(&self, path: String, user_id: Uuid) -> CatalogResult<InstanceBundle> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .query(&[("user_id", user_id.to_string())])
            .send()
            .await
            .map_err(|source| CatalogError::RequestSend {
                path: path.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(CatalogError::NotFound { path }),
            StatusCode::FORBIDDEN => return Err(CatalogError::Forbidden { path }),
            status if !status.is_success() => {
                return Err(CatalogError::RequestStatus { path, status });
            }
            _ => {}
        }

        response
            .json::<InstanceBundle>()
            .await
            .map_err(|source| CatalogError::DecodeResponse { path, source })
    }
}

impl QuizCatalog for HttpQuizCatalog {
    fn get_instance(
        &self,
        instance_id: Uuid,
        user_id: Uuid,
    ) -> BoxFuture<'static, CatalogResult<InstanceBundle>> {
        let catalog = self.clone();
        Box::pin(async move {
            catalog
                .fetch_bundle(format!("internal/instances/{instance_id}"), user_id)
                .await
        })
    }

    fn get_instance_by_access_code(
        &self,
        access_code: String,
        user_id: Uuid,
    ) -> BoxFuture<'static, CatalogResult<InstanceBundle>> {
        let catalog = self.clone();
        Box::pin(async move {
            catalog
                .fetch_bundle(
                    format!("internal/instances/by-code/{access_code}"),
                    user_id,
                )
                .await
        })
    }

    fn update_instance_status(
        &self,
        instance_id: Uuid,
        status: InstanceStatus,
    ) -> BoxFuture<'static, CatalogResult<()>> {
        let catalog = self.clone();
        Box::pin(async move {
            let path = format!("internal/instances/{instance_id}/status");
            let url = format!("{}/{}", catalog.base_url, path);

            let response = catalog
                .client
                .patch(&url)
                .json(&StatusBody { status })
                .send()
                .await
                .map_err(|source| CatalogError::RequestSend {
                    path: path.clone(),
                    source,
                })?;

            match response.status() {
                StatusCode::NOT_FOUND => Err(CatalogError::NotFound { path }),
                status if !status.is_success() => {
                    Err(CatalogError::RequestStatus { path, status })
                }
                _ => Ok(()),
            }
        })
    }
}
