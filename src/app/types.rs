use serde::Serialize;

use crate::jenkins::OperationErrors;
use crate::performance::BenchmarkReport;

/// JSON output for projects
#[derive(Serialize)]
pub struct ProjectOutput {
    pub key: String,
    pub name: String,
    pub full_name: String,
    pub jenkins_url: Option<String>,
    pub aliases: Vec<String>,
}

/// JSON output for entries of a local credentials file
#[derive(Serialize)]
pub struct CredentialEntryOutput {
    pub id: String,
    pub description: String,
    pub username: String,
    /// Leading characters of the ciphertext only.
    pub encrypted_preview: Option<String>,
    pub system: bool,
}

#[derive(Serialize)]
pub struct FailureOutput {
    pub identifier: String,
    pub kind: String,
    pub error: String,
}

/// JSON output for an extraction run
#[derive(Serialize)]
pub struct ExtractOutput {
    pub server: String,
    pub credentials_file: String,
    pub output_file: Option<String>,
    pub strategy: String,
    pub workers: usize,
    pub requested: usize,
    pub succeeded: usize,
    /// Of `succeeded`, how many were entered by hand.
    pub decrypted_by_hand: usize,
    pub failed: usize,
    pub skipped_duplicates: Vec<String>,
    pub elapsed_seconds: f64,
    pub failures: Vec<FailureOutput>,
}

#[derive(Serialize)]
pub struct AuthStatusOutput {
    pub server: String,
    pub cache_file: Option<String>,
    pub cached_auth_type: Option<String>,
    pub cached_description: Option<String>,
    pub cached_expires_at: Option<String>,
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct ClearCacheOutput {
    pub server: String,
    pub deleted: bool,
}

#[derive(Serialize)]
pub struct BreakerOutput {
    pub operation: String,
    pub state: String,
    pub failures: u32,
}

#[derive(Serialize)]
pub struct ErrorStatOutput {
    pub operation: String,
    #[serde(flatten)]
    pub errors: OperationErrors,
}

/// JSON output for `health-check`
#[derive(Serialize)]
pub struct HealthOutput {
    pub server: String,
    pub authenticated: bool,
    pub auth_type: Option<String>,
    pub script_console: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_info: Option<serde_json::Value>,
    pub circuit_breakers: Vec<BreakerOutput>,
    pub errors: Vec<ErrorStatOutput>,
    pub problems: Vec<String>,
}

#[derive(Serialize)]
pub struct BenchmarkOutput {
    pub server: String,
    pub sample_size: usize,
    pub reports: Vec<BenchmarkReport>,
    pub saved: Vec<String>,
    /// CSV summary of recent runs, when it could be written.
    pub csv_report: Option<String>,
    pub fastest: Option<String>,
    pub most_reliable: Option<String>,
}
