//! Compute reports operations with a status string and a list of errors
//! rather than the `done`/`error` pair the other APIs use.

use plinth_core::{Operation, OperationStatus};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct ComputeOperation {
    name: String,
    status: String,
    http_error_status_code: Option<i32>,
    error: Option<ComputeErrors>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ComputeErrors {
    errors: Vec<ComputeErrorItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ComputeErrorItem {
    code: String,
    message: String,
}

impl ComputeOperation {
    pub(crate) fn into_operation(self) -> Operation {
        let done = self.status == "DONE";
        let error = self.error.filter(|e| !e.errors.is_empty()).map(|e| OperationStatus {
            code: self.http_error_status_code.unwrap_or(0),
            message: e
                .errors
                .iter()
                .map(|i| if i.code.is_empty() { i.message.clone() } else { format!("{}: {}", i.code, i.message) })
                .collect::<Vec<_>>()
                .join("; "),
        });
        Operation { name: self.name, done, error }
    }
}
