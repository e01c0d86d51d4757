//! Maps the single delivery outcome of a batch back onto its records.

use numaflow::sink;

use crate::dispatch::DeliveryOutcome;
use crate::message::Record;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Ok,
    Failed(String),
}

/// Per-record answer to the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub id: String,
    pub status: Status,
}

impl Response {
    pub fn ok(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: Status::Ok,
        }
    }

    pub fn failed(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: Status::Failed(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }
}

impl From<Response> for sink::Response {
    fn from(response: Response) -> Self {
        match response.status {
            Status::Ok => sink::Response::ok(response.id),
            Status::Failed(message) => sink::Response::failure(response.id, message),
        }
    }
}

/// One response per record, in record order. Duplicates are always OK, everything else shares
/// the batch outcome. A missing duplicate flag counts as not duplicate.
pub fn reconcile(
    records: &[Record],
    duplicates: &[bool],
    outcome: DeliveryOutcome,
    failure_message: &str,
) -> Vec<Response> {
    let delivered = matches!(
        outcome,
        DeliveryOutcome::Success | DeliveryOutcome::Dropped
    );

    records
        .iter()
        .enumerate()
        .map(|(i, record)| {
            let duplicate = duplicates.get(i).copied().unwrap_or(false);
            if duplicate || delivered {
                Response::ok(record.id.clone())
            } else {
                Response::failed(record.id.clone(), failure_message)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAILED: &str = "failed to trigger workflow";

    fn records(n: usize) -> Vec<Record> {
        (0..n).map(|i| Record::new(format!("id-{i}"), "{}")).collect()
    }

    #[test]
    fn test_success_and_dropped_are_ok() {
        let records = records(3);
        for outcome in [DeliveryOutcome::Success, DeliveryOutcome::Dropped] {
            let responses = reconcile(&records, &[false, true, false], outcome, FAILED);
            assert_eq!(responses.len(), 3);
            assert!(responses.iter().all(Response::is_ok));
        }
    }

    #[test]
    fn test_failures_spare_duplicates() {
        let records = records(3);
        for outcome in [
            DeliveryOutcome::FailurePermanent,
            DeliveryOutcome::FailureRetryable,
        ] {
            let responses = reconcile(&records, &[false, true, false], outcome, FAILED);
            assert_eq!(
                responses,
                vec![
                    Response::failed("id-0", FAILED),
                    Response::ok("id-1"),
                    Response::failed("id-2", FAILED),
                ]
            );
        }
    }

    #[test]
    fn test_one_response_per_record_in_order() {
        let records = records(5);
        let responses = reconcile(&records, &[], DeliveryOutcome::FailurePermanent, FAILED);

        let ids: Vec<&str> = responses.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["id-0", "id-1", "id-2", "id-3", "id-4"]);
        assert!(responses.iter().all(|r| !r.is_ok()));
    }

    #[test]
    fn test_empty_batch() {
        assert!(reconcile(&[], &[], DeliveryOutcome::Success, FAILED).is_empty());
    }

    #[test]
    fn test_into_sdk_response() {
        let ok: sink::Response = Response::ok("a").into();
        assert!(ok.success);

        let failed: sink::Response = Response::failed("b", FAILED).into();
        assert!(!failed.success);
    }
}
