//! The HTTP surface: every route delegates straight to a `Node` facade
//! method. No templating, no static serving — request parsing and
//! routing are the only things this module does.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::blockchain::block::Block;
use crate::blockchain::chain::ChainReader;
use crate::blockchain::transaction::{Transaction, TransactionId};
use crate::error::NodeError;
use crate::node::Node;

pub fn router(node: Arc<Node>) -> Router {
    Router::new()
        .route("/blockchain", get(get_blockchain))
        .route("/stats", get(get_stats))
        .route("/receive-new-block", post(receive_new_block))
        .route("/register-and-broadcast-node", post(register_and_broadcast_node))
        .route("/register-node", post(register_node))
        .route("/register-nodes-bulk", post(register_nodes_bulk))
        .route("/transaction", post(post_transaction))
        .route("/transaction/broadcast", post(post_transaction))
        .route("/transaction/send", post(post_transaction))
        .route("/mine", get(mine_now))
        .route("/mining/start", post(mining_start))
        .route("/mining/stop", post(mining_stop))
        .route("/mining/status", get(mining_status))
        .route("/block/:hash", get(get_block_by_hash))
        .route("/transaction/:id", get(get_transaction_by_id))
        .route("/address/:addr", get(get_address))
        .route("/api/network/peers", get(get_peers))
        .route("/api/network/discover", post(discover_now))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()))
        .with_state(node)
}

struct ApiError(NodeError);

impl From<NodeError> for ApiError {
    fn from(err: NodeError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.status();
        let body = Json(json!({ "error": self.0.kind(), "message": self.0.to_string() }));
        (status, body).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

async fn get_blockchain(State(node): State<Arc<Node>>) -> Json<serde_json::Value> {
    Json(json!({
        "chain": node.chain.as_ref().snapshot(),
        "pendingTransactions": node.mempool.snapshot(),
        "difficulty": node.chain.as_ref().tip().difficulty,
        "networkName": node.config.network_name,
        "tokenName": node.config.token_name,
        "tokenSymbol": node.config.token_symbol,
        "miningReward": node.config.mining.mining_reward,
    }))
}

async fn get_stats(State(node): State<Arc<Node>>) -> Json<serde_json::Value> {
    Json(serde_json::to_value(node.metrics()).expect("metrics always serialize"))
}

#[derive(Deserialize)]
struct ReceiveBlockBody {
    block: Block,
}

/// Always answers 200: a rejected block is reported via `note`, not an
/// HTTP error status, matching the source's "never let one bad peer push
/// disrupt the caller" contract. Deeper reconciliation after a rejection
/// is the sync manager's job, not this handler's.
async fn receive_new_block(
    State(node): State<Arc<Node>>,
    Json(body): Json<ReceiveBlockBody>,
) -> Json<serde_json::Value> {
    match node.receive_block(body.block.clone()) {
        Ok(()) => Json(json!({ "note": "new block received and accepted", "newBlock": body.block })),
        Err(err) => {
            tracing::debug!(error = %err, "inbound block rejected");
            Json(json!({ "note": "rejected", "newBlock": body.block }))
        }
    }
}

#[derive(Deserialize)]
struct RegisterNodeBody {
    #[serde(alias = "newNodeUrl", alias = "nodeUrl")]
    new_node_url: String,
}

async fn register_and_broadcast_node(
    State(node): State<Arc<Node>>,
    Json(body): Json<RegisterNodeBody>,
) -> Json<serde_json::Value> {
    let added = node.peers.add(body.new_node_url.clone());
    if added {
        let client = reqwest::Client::new();
        let timeout = node.config.peer_request_timeout();
        let concurrency = node.config.network.gossip_fanout_concurrency;
        let new_node_url = body.new_node_url.clone();
        futures::stream::iter(node.peers.urls())
            .map(|peer_url| {
                let client = client.clone();
                let new_node_url = new_node_url.clone();
                async move {
                    let _ = client
                        .post(format!("{peer_url}/register-node"))
                        .json(&json!({ "newNodeUrl": new_node_url }))
                        .timeout(timeout)
                        .send()
                        .await;
                }
            })
            .buffer_unordered(concurrency)
            .for_each(|_| async {})
            .await;
    }
    Json(json!({ "added": added, "peers": node.peers.urls() }))
}

async fn register_node(State(node): State<Arc<Node>>, Json(body): Json<RegisterNodeBody>) -> Json<serde_json::Value> {
    let added = node.peers.add(body.new_node_url);
    Json(json!({ "added": added }))
}

#[derive(Deserialize)]
struct RegisterNodesBulkBody {
    #[serde(alias = "nodeUrls")]
    node_urls: Vec<String>,
}

async fn register_nodes_bulk(
    State(node): State<Arc<Node>>,
    Json(body): Json<RegisterNodesBulkBody>,
) -> Json<serde_json::Value> {
    let added: usize = body.node_urls.into_iter().filter(|url| node.peers.add(url.clone())).count();
    Json(json!({ "added": added, "peers": node.peers.urls() }))
}

async fn post_transaction(
    State(node): State<Arc<Node>>,
    Json(tx): Json<Transaction>,
) -> ApiResult<Json<serde_json::Value>> {
    let id = node.submit_transaction(tx.clone())?;
    node.gossiper.broadcast_transaction(node.peers.as_ref(), &tx).await;
    Ok(Json(json!({ "transactionId": id.to_string() })))
}

async fn mine_now(State(node): State<Arc<Node>>) -> ApiResult<Json<serde_json::Value>> {
    let config = node.config.as_ref();
    let block = node
        .miner
        .try_mine_one(node.chain.clone(), node.mempool.clone(), config)
        .await
        .ok_or_else(|| NodeError::Unsupported("mining is disabled or no candidate was found".into()))?;
    node.gossiper.broadcast_block(node.peers.as_ref(), &block).await;
    Ok(Json(json!({ "block": block })))
}

async fn mining_start(State(node): State<Arc<Node>>) -> Json<serde_json::Value> {
    node.miner.start();
    Json(json!({ "mining": true }))
}

async fn mining_stop(State(node): State<Arc<Node>>) -> Json<serde_json::Value> {
    node.miner.stop();
    Json(json!({ "mining": false }))
}

async fn mining_status(State(node): State<Arc<Node>>) -> Json<serde_json::Value> {
    Json(json!({
        "mining": node.miner.is_enabled(),
        "averageBlockIntervalMs": node.miner.average_block_interval_ms(),
    }))
}

async fn get_block_by_hash(
    State(node): State<Arc<Node>>,
    Path(hash): Path<String>,
) -> ApiResult<Json<Block>> {
    node.chain
        .as_ref()
        .block_by_hash(&hash)
        .map(Json)
        .ok_or_else(|| ApiError(NodeError::InvalidBlock(format!("no block with hash {hash}"))))
}

async fn get_transaction_by_id(
    State(node): State<Arc<Node>>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let id = u128::from_str_radix(&id, 16)
        .map_err(|_| ApiError(NodeError::InvalidTransaction("malformed transaction id".into())))?;
    let (tx, block_index) = node
        .chain
        .as_ref()
        .transaction_by_id(TransactionId(id))
        .ok_or_else(|| ApiError(NodeError::InvalidTransaction("transaction not found".into())))?;
    Ok(Json(json!({ "transaction": tx, "blockIndex": block_index })))
}

async fn get_address(State(node): State<Arc<Node>>, Path(addr): Path<String>) -> Json<serde_json::Value> {
    Json(serde_json::to_value(node.address_data(&addr)).expect("address data always serializes"))
}

async fn get_peers(State(node): State<Arc<Node>>) -> Json<Vec<String>> {
    Json(node.peers.urls())
}

async fn discover_now(State(node): State<Arc<Node>>) -> Json<serde_json::Value> {
    let client = reqwest::Client::new();
    node.peers.discover(&client, node.config.as_ref()).await;
    Json(json!({ "peers": node.peers.urls() }))
}
