use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "fleetwatch API",
        version = "0.1.0",
        description = "GPS positions and alarms scraped from a fleet-tracking dashboard."
    ),
    paths(
        crate::routes::root,
        crate::routes::status,
        crate::routes::gps,
        crate::routes::alarms,
        crate::routes::reset,
        crate::routes::refresh,
    ),
    components(schemas(
        crate::dto::MessageResponse,
        crate::dto::StatusResponse,
        crate::dto::GpsResponse,
        crate::dto::AlarmResponse,
        crate::dto::RefreshEntry,
        crate::dto::RefreshResponse,
        crate::dto::ErrorResponse,
    )),
    tags(
        (name = "data", description = "Scraped datasets"),
        (name = "system", description = "Service status and control"),
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Adds Bearer token security scheme to the OpenAPI spec.
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("token")
                        .description(Some(
                            "Admin token. Set via FLEETWATCH_ADMIN_TOKEN environment variable.",
                        ))
                        .build(),
                ),
            );
        }
    }
}
