use std::{
    ffi::{c_char, CStr, CString},
    sync::Arc,
};

use serde::Serialize;
use toggle_engine::Context;

/// Errors reported to the host in the response envelope.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum FfiError {
    /// A required pointer argument was null.
    #[error("argument `{0}` is null")]
    NullArgument(&'static str),

    /// A string argument was not valid UTF-8.
    #[error("argument `{0}` is not valid UTF-8")]
    InvalidUtf8(&'static str),

    /// The context argument could not be deserialized.
    #[error("invalid context: {0}")]
    InvalidContext(Arc<serde_json::Error>),

    /// The engine handle is unknown or was already freed.
    #[error("unknown engine handle {0}")]
    InvalidHandle(u64),

    /// Loading the state payload failed.
    #[error(transparent)]
    Load(#[from] toggle_engine::Error),
}

impl FfiError {
    /// Machine-readable kind, reported as `errorKind`.
    pub fn kind(&self) -> &'static str {
        match self {
            FfiError::NullArgument(_) => "NullArgument",
            FfiError::InvalidUtf8(_) => "InvalidUtf8",
            FfiError::InvalidContext(_) => "InvalidContext",
            FfiError::InvalidHandle(_) => "InvalidHandle",
            FfiError::Load(err) => err.kind(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub(crate) enum StatusCode {
    Ok,
    NotFound,
    Error,
}

/// The JSON envelope every string-returning call produces.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Response<T> {
    status_code: StatusCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_kind: Option<&'static str>,
}

impl<T: Serialize> From<Result<Option<T>, FfiError>> for Response<T> {
    fn from(result: Result<Option<T>, FfiError>) -> Self {
        match result {
            Ok(Some(value)) => Response {
                status_code: StatusCode::Ok,
                value: Some(value),
                error_message: None,
                error_kind: None,
            },
            Ok(None) => Response {
                status_code: StatusCode::NotFound,
                value: None,
                error_message: None,
                error_kind: None,
            },
            Err(err) => {
                log::warn!(target: "toggle_engine", kind = err.kind(); "ffi call failed: {err}");
                Response {
                    status_code: StatusCode::Error,
                    value: None,
                    error_message: Some(err.to_string()),
                    error_kind: Some(err.kind()),
                }
            }
        }
    }
}

const FALLBACK_RESPONSE: &str =
    r#"{"statusCode":"Error","errorMessage":"failed to encode response","errorKind":"Encoding"}"#;

/// Serialize a result into an owned C string. Release it with `free_response`.
pub(crate) fn into_raw<T: Serialize>(result: Result<Option<T>, FfiError>) -> *mut c_char {
    let response = Response::from(result);
    // serde_json escapes NUL, so the encoded JSON never contains an interior NUL byte.
    let json = serde_json::to_string(&response).unwrap_or_else(|_| FALLBACK_RESPONSE.to_owned());
    CString::new(json).unwrap_or_default().into_raw()
}

/// Borrow a string argument.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string that outlives the returned slice.
pub(crate) unsafe fn str_arg<'a>(
    ptr: *const c_char,
    name: &'static str,
) -> Result<&'a str, FfiError> {
    if ptr.is_null() {
        return Err(FfiError::NullArgument(name));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|_| FfiError::InvalidUtf8(name))
}

/// Parse a JSON context argument. Anything but a JSON object is rejected.
///
/// # Safety
///
/// Same contract as [`str_arg`].
pub(crate) unsafe fn context_arg(ptr: *const c_char) -> Result<Context, FfiError> {
    let json = str_arg(ptr, "context")?;
    let invalid = |err: serde_json::Error| FfiError::InvalidContext(Arc::new(err));

    let value: serde_json::Value = serde_json::from_str(json).map_err(invalid)?;
    if !value.is_object() {
        return Err(invalid(serde::de::Error::custom(
            "context must be a JSON object",
        )));
    }
    serde_json::from_value(value).map_err(invalid)
}
