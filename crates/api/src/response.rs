use serde::Serialize;

/// Standard success envelope: every endpoint wraps its payload in
/// `{"data": ...}` so clients can rely on one shape.
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}
