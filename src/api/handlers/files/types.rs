use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

/// Multipart body accepted by `POST /upload`.
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct UploadForm {
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadFromUrlRequest {
    #[validate(url)]
    pub url: String,
    #[validate(length(min = 1, max = 255))]
    pub file_name: String,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UploadFromUrlQuery {
    /// Store under `fileName` exactly, without the timestamp prefix
    #[serde(default)]
    pub no_timestamp: bool,
}
