//! Gateway namespace: the administrative HTTP entrypoint.

mod http;

pub use http::{
    EnrollmentLinksRequest, GatewayState, HealthResponse, StatusResponse, SubmitResponse,
    TemplateIdsRequest, TemplateTagsRequest, router, run_http,
};
