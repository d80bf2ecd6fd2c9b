//! Consumer side of the capability queue

use async_trait::async_trait;
use lantern_common::cancel::CancellationToken;
use tracing::{debug, instrument};

use super::message::CapabilityMessage;
use super::selective::persist_selective;
use crate::error::{IngestError, Result};
use crate::pipeline::{PersistOutcome, RecordPersister};
use crate::store::CancellableEndpointStore;

const DESCRIBE_CHARS: usize = 120;

/// Turns raw querier payloads into endpoint info rows
#[derive(Clone)]
pub struct CapabilityReceiver {
    store: CancellableEndpointStore,
}

impl CapabilityReceiver {
    pub fn new(store: CancellableEndpointStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &CancellableEndpointStore {
        &self.store
    }

    /// Decode and persist one raw queue message
    #[instrument(skip_all)]
    pub async fn receive(&self, raw: &[u8], cancel: &CancellationToken) -> Result<PersistOutcome> {
        if cancel.is_cancelled() {
            return Err(IngestError::CanceledBeforeStart);
        }
        let message = CapabilityMessage::decode(raw)?;
        self.persist_message(&message, cancel).await
    }

    pub async fn persist_message(
        &self,
        message: &CapabilityMessage,
        cancel: &CancellationToken,
    ) -> Result<PersistOutcome> {
        let (info, observation) = message.normalize();
        let existing = self.store.get_endpoint_info_by_url(cancel, info.url.clone()).await?;
        debug!(url = %info.url, known = existing.is_some(), "Received capability message");
        persist_selective(&self.store, existing.as_ref(), info, observation, cancel).await
    }
}

/// Batch adapter over a stream of raw queue payloads. Undecodable payloads
/// are reported by the batch as format or decode skips.
#[derive(Clone)]
pub struct EndpointPersister {
    receiver: CapabilityReceiver,
}

impl EndpointPersister {
    pub fn new(receiver: CapabilityReceiver) -> Self {
        Self { receiver }
    }
}

#[async_trait]
impl RecordPersister for EndpointPersister {
    type Record = Vec<u8>;

    fn describe(&self, record: &Vec<u8>) -> String {
        String::from_utf8_lossy(record).chars().take(DESCRIBE_CHARS).collect()
    }

    async fn persist(&self, record: &Vec<u8>, cancel: &CancellationToken) -> Result<PersistOutcome> {
        self.receiver.receive(record, cancel).await
    }
}
