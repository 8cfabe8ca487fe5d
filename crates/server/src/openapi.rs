use serde::Serialize;
use utoipa::OpenApi;
use utoipa::ToSchema;

#[derive(ToSchema)]
pub struct HealthResponse { pub status: String }

/// `{"status": "success" | "error", ...}`; success bodies add `data`, `message` or `ID`.
#[derive(ToSchema)]
pub struct EnvelopeDoc {
    pub status: String,
    pub message: Option<String>,
}

/// Record fields keyed by column name; any schema column may appear.
#[derive(Serialize, ToSchema)]
pub struct RecordDoc {
    #[serde(rename = "ID")]
    pub id: Option<String>,
    #[serde(rename = "Full Name")]
    pub full_name: Option<String>,
    #[serde(rename = "Is Active")]
    pub is_active: Option<String>,
    /// Sheet row holding the record; required to update `employees_unit1`
    #[serde(rename = "rowIndex")]
    pub row_index: Option<u64>,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::health,
        crate::routes::datasets::read,
        crate::routes::datasets::write,
    ),
    components(
        schemas(
            HealthResponse,
            EnvelopeDoc,
            RecordDoc,
        )
    ),
    tags(
        (name = "health"),
        (name = "datasets")
    )
)]
pub struct ApiDoc;
