//! Outbound fan-out of freshly-accepted blocks and transactions to known
//! peers, with bounded concurrency and per-peer error isolation: one
//! unreachable peer never blocks or fails the broadcast to the rest.

use std::time::Duration;

use futures::stream::{self, StreamExt};

use crate::blockchain::{Block, Transaction};
use crate::network::peer::PeerSet;

pub struct Gossiper {
    client: reqwest::Client,
    concurrency: usize,
    timeout: Duration,
}

impl Gossiper {
    pub fn new(client: reqwest::Client, concurrency: usize, timeout: Duration) -> Self {
        Gossiper {
            client,
            concurrency,
            timeout,
        }
    }

    pub async fn broadcast_block(&self, peers: &PeerSet, block: &Block) {
        let urls = peers.urls();
        let body = serde_json::json!({ "block": block });
        let timeout = self.timeout;
        stream::iter(urls)
            .map(|url| {
                let client = self.client.clone();
                let body = body.clone();
                async move {
                    let result = client
                        .post(format!("{url}/receive-new-block"))
                        .json(&body)
                        .timeout(timeout)
                        .send()
                        .await;
                    if let Err(err) = result {
                        tracing::debug!(peer = %url, error = %err, "block broadcast to peer failed");
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .for_each(|_| async {})
            .await;
    }

    /// Posts the transaction itself as the request body — not wrapped in
    /// an envelope — since the receiving node's `/transaction/broadcast`
    /// handler deserializes the body directly as a `Transaction`.
    pub async fn broadcast_transaction(&self, peers: &PeerSet, tx: &Transaction) {
        let urls = peers.urls();
        let body = serde_json::to_value(tx).expect("transaction always serializes");
        let timeout = self.timeout;
        stream::iter(urls)
            .map(|url| {
                let client = self.client.clone();
                let body = body.clone();
                async move {
                    let result = client
                        .post(format!("{url}/transaction/broadcast"))
                        .json(&body)
                        .timeout(timeout)
                        .send()
                        .await;
                    if let Err(err) = result {
                        tracing::debug!(peer = %url, error = %err, "transaction broadcast to peer failed");
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .for_each(|_| async {})
            .await;
    }
}
