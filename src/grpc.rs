use std::sync::Arc;
use tonic::{Request, Response, Status};

pub mod webhookify {
    pub mod v1 {
        tonic::include_proto!("webhookify.v1");
    }
}

use webhookify::v1::webhook_service_server::{WebhookService, WebhookServiceServer};
use webhookify::v1::{
    CreateWebhookRequest, CreateWebhookResponse, SubmitEventRequest, SubmitEventResponse,
};

use crate::registration::RegistrationService;

/// Thin translation layer: validates the two request shapes the gateway
/// itself is responsible for (per the original transport layer) and maps
/// core error kinds to gRPC status codes. All other validation and the
/// actual ingest work happens in `RegistrationService`.
pub struct WebhookServiceImpl {
    registration: Arc<RegistrationService>,
}

impl WebhookServiceImpl {
    pub fn new(registration: Arc<RegistrationService>) -> Self {
        Self { registration }
    }

    pub fn into_server(self) -> WebhookServiceServer<Self> {
        WebhookServiceServer::new(self)
    }
}

#[tonic::async_trait]
impl WebhookService for WebhookServiceImpl {
    async fn create_webhook(
        &self,
        request: Request<CreateWebhookRequest>,
    ) -> Result<Response<CreateWebhookResponse>, Status> {
        let req = request.into_inner();
        if req.url.is_empty() {
            return Err(Status::invalid_argument("url is required"));
        }

        let (webhook_id, secret) = self
            .registration
            .create_webhook(&req.url)
            .await
            .map_err(|e| {
                e.log();
                e.to_status()
            })?;

        Ok(Response::new(CreateWebhookResponse { webhook_id, secret }))
    }

    async fn submit_event(
        &self,
        request: Request<SubmitEventRequest>,
    ) -> Result<Response<SubmitEventResponse>, Status> {
        let req = request.into_inner();
        if req.secret.is_empty() {
            return Err(Status::invalid_argument("secret is required"));
        }

        let event_id = self
            .registration
            .submit_event(req.webhook_id, &req.payload, &req.secret)
            .await
            .map_err(|e| {
                e.log();
                e.to_status()
            })?;

        Ok(Response::new(SubmitEventResponse {
            event_id,
            created: true,
        }))
    }
}
