use numaflow::sink::SinkRequest;

/// A record handed to the sink by the platform. The `id` is unique within a batch and must be
/// echoed back in exactly one response.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    pub id: String,
    pub payload: Vec<u8>,
}

impl Record {
    pub fn new(id: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
        }
    }
}

impl From<SinkRequest> for Record {
    fn from(request: SinkRequest) -> Self {
        Self {
            id: request.id,
            payload: request.value,
        }
    }
}
