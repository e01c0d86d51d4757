//! Turns the surviving payloads of a batch into the single [OutboundUnit] sent downstream.

use crate::Error;
use crate::error::Result;

pub mod metric;

use metric::{MetricDecoder, MetricSample};

/// What a batch is delivered as. Built fresh per batch.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundUnit {
    /// Raw payloads, sent as one JSON array of strings.
    Payloads(Vec<String>),
    /// Decoded gauge samples, pushed one by one.
    Samples(Vec<MetricSample>),
}

impl OutboundUnit {
    pub fn len(&self) -> usize {
        match self {
            OutboundUnit::Payloads(payloads) => payloads.len(),
            OutboundUnit::Samples(samples) => samples.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The JSON array of payload strings. Samples have no JSON form, they are pushed one by one.
    pub fn to_json(&self) -> Result<String> {
        match self {
            OutboundUnit::Payloads(payloads) => serde_json::to_string(payloads)
                .map_err(|e| Error::Decode(format!("Serializing outbound unit: {e}"))),
            OutboundUnit::Samples(_) => Err(Error::UnsupportedType(
                "metric samples cannot be sent as a JSON array".to_string(),
            )),
        }
    }

    /// Approximate size on the wire, in bytes.
    pub fn size(&self) -> usize {
        match self {
            OutboundUnit::Payloads(payloads) => {
                // brackets, quotes and commas
                payloads.iter().map(|p| p.len() + 3).sum::<usize>() + 1
            }
            OutboundUnit::Samples(samples) => samples.iter().map(MetricSample::size).sum(),
        }
    }
}

/// How survivors are aggregated, one strategy per downstream flavor.
#[derive(Debug, Clone)]
pub enum Aggregator {
    JsonArray,
    Metrics(MetricDecoder),
}

impl Aggregator {
    /// `Ok(None)` when there is nothing to send.
    pub fn aggregate(&self, survivors: &[&[u8]]) -> Result<Option<OutboundUnit>> {
        let unit = match self {
            Aggregator::JsonArray => OutboundUnit::Payloads(
                survivors
                    .iter()
                    .map(|payload| String::from_utf8_lossy(payload).into_owned())
                    .collect(),
            ),
            Aggregator::Metrics(decoder) => OutboundUnit::Samples(decoder.decode_all(survivors)?),
        };

        Ok(Some(unit).filter(|unit| !unit.is_empty()))
    }
}
