//! Address-space operations: Browse, Read, Write, Call, path translation,
//! node registration and HistoryRead.
//!
//! Per-item status codes are part of the successful result and are never
//! raised; only the response envelope can fail a call.

use opcua_core::types::{
    ByteString, DataValue, ExtensionObject, NodeId, StatusCode, Variant,
};

use crate::client::Client;
use crate::error::{Error, Result};
use crate::messages::attributes::{
    BrowseDescription, BrowseNextRequest, BrowseNextResponse, BrowsePath, BrowsePathResult,
    BrowseRequest, BrowseResponse, BrowseResult, CallMethodRequest, CallMethodResult, CallRequest,
    CallResponse, HistoryReadRequest, HistoryReadResponse, HistoryReadResult, HistoryReadValueId,
    ReadRequest, ReadResponse, ReadValueId, ReferenceDescription, RegisterNodesRequest,
    RegisterNodesResponse, TranslateBrowsePathsToNodeIdsRequest,
    TranslateBrowsePathsToNodeIdsResponse, UnregisterNodesRequest, UnregisterNodesResponse,
    ViewDescription, WriteRequest, WriteResponse, WriteValue,
};
use crate::messages::TimestampsToReturn;

/// Hard stop for continuation-point walks, against runaway servers.
const MAX_CONTINUATION_ROUNDS: usize = 1000;

/// One node's fully-walked browse result.
#[derive(Debug, Clone)]
pub struct BrowseOutcome {
    pub status: StatusCode,
    pub references: Vec<ReferenceDescription>,
}

impl Client {
    // ── Read / Write ──────────────────────────────────────────────────────────

    /// Read attributes; one DataValue per input, statuses inside.
    pub async fn read(&self, nodes_to_read: &[ReadValueId]) -> Result<Vec<DataValue>> {
        self.read_with_options(nodes_to_read, 0.0, TimestampsToReturn::Both)
            .await
    }

    pub async fn read_with_options(
        &self,
        nodes_to_read: &[ReadValueId],
        max_age_ms: f64,
        timestamps_to_return: TimestampsToReturn,
    ) -> Result<Vec<DataValue>> {
        require_batch(nodes_to_read, "read")?;
        let request = ReadRequest {
            request_header: self.session().new_request_header()?,
            max_age: max_age_ms,
            timestamps_to_return,
            nodes_to_read: Some(nodes_to_read.to_vec()),
        };
        let response: ReadResponse = self.session().dispatcher().call(&request).await?;
        Ok(response.results.unwrap_or_default())
    }

    /// Convenience: the Value attribute of one node.
    pub async fn read_value(&self, node_id: NodeId) -> Result<DataValue> {
        let mut results = self.read(&[ReadValueId::value_of(node_id)]).await?;
        results
            .pop()
            .ok_or_else(|| Error::usage("server returned no result for the read"))
    }

    /// Write attributes; one StatusCode per input.
    pub async fn write(&self, nodes_to_write: &[WriteValue]) -> Result<Vec<StatusCode>> {
        require_batch(nodes_to_write, "write")?;
        let request = WriteRequest {
            request_header: self.session().new_request_header()?,
            nodes_to_write: Some(nodes_to_write.to_vec()),
        };
        let response: WriteResponse = self.session().dispatcher().call(&request).await?;
        Ok(response.results.unwrap_or_default())
    }

    /// Convenience: write one node's Value attribute.
    pub async fn write_value(
        &self,
        node_id: NodeId,
        value: impl Into<Variant>,
    ) -> Result<StatusCode> {
        let mut results = self
            .write(&[WriteValue::value_of(node_id, value)])
            .await?;
        results
            .pop()
            .ok_or_else(|| Error::usage("server returned no result for the write"))
    }

    // ── Browse ────────────────────────────────────────────────────────────────

    /// One browse round; continuation points are the caller's to walk.
    pub async fn browse(
        &self,
        nodes_to_browse: &[BrowseDescription],
        max_references_per_node: u32,
    ) -> Result<Vec<BrowseResult>> {
        require_batch(nodes_to_browse, "browse")?;
        let request = BrowseRequest {
            request_header: self.session().new_request_header()?,
            view: ViewDescription::default(),
            requested_max_references_per_node: max_references_per_node,
            nodes_to_browse: Some(nodes_to_browse.to_vec()),
        };
        let response: BrowseResponse = self.session().dispatcher().call(&request).await?;
        Ok(response.results.unwrap_or_default())
    }

    pub async fn browse_next(
        &self,
        continuation_points: &[ByteString],
        release: bool,
    ) -> Result<Vec<BrowseResult>> {
        require_batch(continuation_points, "browse_next")?;
        let request = BrowseNextRequest {
            request_header: self.session().new_request_header()?,
            release_continuation_points: release,
            continuation_points: Some(continuation_points.to_vec()),
        };
        let response: BrowseNextResponse = self.session().dispatcher().call(&request).await?;
        Ok(response.results.unwrap_or_default())
    }

    /// Browse and walk every continuation point to the end.
    pub async fn managed_browse(
        &self,
        nodes_to_browse: &[BrowseDescription],
    ) -> Result<Vec<BrowseOutcome>> {
        let results = self.browse(nodes_to_browse, 0).await?;
        let mut outcomes: Vec<BrowseOutcome> = results
            .iter()
            .map(|r| BrowseOutcome {
                status: r.status_code,
                references: r.references.clone().unwrap_or_default(),
            })
            .collect();

        // (outcome index, current continuation point) for unfinished nodes.
        let mut open: Vec<(usize, ByteString)> = results
            .into_iter()
            .enumerate()
            .filter(|(_, r)| !r.continuation_point.is_null())
            .map(|(i, r)| (i, r.continuation_point))
            .collect();

        let mut rounds = 0;
        while !open.is_empty() {
            rounds += 1;
            if rounds > MAX_CONTINUATION_ROUNDS {
                tracing::warn!(rounds, "browse continuation cap reached");
                return Err(Error::ContinuationExhausted);
            }
            let points: Vec<ByteString> = open.iter().map(|(_, p)| p.clone()).collect();
            let next = self.browse_next(&points, false).await?;
            let mut still_open = Vec::new();
            for ((index, _), result) in open.into_iter().zip(next) {
                let outcome = &mut outcomes[index];
                if result.status_code.is_bad() {
                    outcome.status = result.status_code;
                    continue;
                }
                outcome
                    .references
                    .extend(result.references.unwrap_or_default());
                if !result.continuation_point.is_null() {
                    still_open.push((index, result.continuation_point));
                }
            }
            open = still_open;
        }
        Ok(outcomes)
    }

    // ── Call ──────────────────────────────────────────────────────────────────

    pub async fn call(
        &self,
        methods_to_call: &[CallMethodRequest],
    ) -> Result<Vec<CallMethodResult>> {
        require_batch(methods_to_call, "call")?;
        let request = CallRequest {
            request_header: self.session().new_request_header()?,
            methods_to_call: Some(methods_to_call.to_vec()),
        };
        let response: CallResponse = self.session().dispatcher().call(&request).await?;
        Ok(response.results.unwrap_or_default())
    }

    /// Convenience: one method invocation.
    pub async fn call_method(
        &self,
        object_id: NodeId,
        method_id: NodeId,
        input_arguments: Vec<Variant>,
    ) -> Result<CallMethodResult> {
        let mut results = self
            .call(&[CallMethodRequest {
                object_id,
                method_id,
                input_arguments: Some(input_arguments),
            }])
            .await?;
        results
            .pop()
            .ok_or_else(|| Error::usage("server returned no result for the call"))
    }

    // ── Paths and registration ────────────────────────────────────────────────

    pub async fn translate_browse_paths(
        &self,
        browse_paths: &[BrowsePath],
    ) -> Result<Vec<BrowsePathResult>> {
        require_batch(browse_paths, "translate_browse_paths")?;
        let request = TranslateBrowsePathsToNodeIdsRequest {
            request_header: self.session().new_request_header()?,
            browse_paths: Some(browse_paths.to_vec()),
        };
        let response: TranslateBrowsePathsToNodeIdsResponse =
            self.session().dispatcher().call(&request).await?;
        Ok(response.results.unwrap_or_default())
    }

    /// Server-side aliasing for nodes addressed repeatedly.
    pub async fn register_nodes(&self, nodes_to_register: &[NodeId]) -> Result<Vec<NodeId>> {
        require_batch(nodes_to_register, "register_nodes")?;
        let request = RegisterNodesRequest {
            request_header: self.session().new_request_header()?,
            nodes_to_register: Some(nodes_to_register.to_vec()),
        };
        let response: RegisterNodesResponse = self.session().dispatcher().call(&request).await?;
        Ok(response.registered_node_ids.unwrap_or_default())
    }

    pub async fn unregister_nodes(&self, nodes_to_unregister: &[NodeId]) -> Result<()> {
        require_batch(nodes_to_unregister, "unregister_nodes")?;
        let request = UnregisterNodesRequest {
            request_header: self.session().new_request_header()?,
            nodes_to_unregister: Some(nodes_to_unregister.to_vec()),
        };
        let _: UnregisterNodesResponse = self.session().dispatcher().call(&request).await?;
        Ok(())
    }

    // ── History ───────────────────────────────────────────────────────────────

    /// One HistoryRead round; per-node continuation points come back in the
    /// results.
    pub async fn history_read(
        &self,
        details: ExtensionObject,
        timestamps_to_return: TimestampsToReturn,
        release_continuation_points: bool,
        nodes_to_read: &[HistoryReadValueId],
    ) -> Result<Vec<HistoryReadResult>> {
        require_batch(nodes_to_read, "history_read")?;
        let request = HistoryReadRequest {
            request_header: self.session().new_request_header()?,
            history_read_details: details,
            timestamps_to_return,
            release_continuation_points,
            nodes_to_read: Some(nodes_to_read.to_vec()),
        };
        let response: HistoryReadResponse = self.session().dispatcher().call(&request).await?;
        Ok(response.results.unwrap_or_default())
    }

    /// HistoryRead walking every continuation point, collecting the raw
    /// history payloads per node.
    pub async fn managed_history_read(
        &self,
        details: ExtensionObject,
        timestamps_to_return: TimestampsToReturn,
        nodes_to_read: &[HistoryReadValueId],
    ) -> Result<Vec<(StatusCode, Vec<ExtensionObject>)>> {
        let mut results = self
            .history_read(details.clone(), timestamps_to_return, false, nodes_to_read)
            .await?;
        let mut outcomes: Vec<(StatusCode, Vec<ExtensionObject>)> = results
            .iter()
            .map(|r| (r.status_code, vec![r.history_data.clone()]))
            .collect();

        let mut rounds = 0;
        loop {
            let open: Vec<(usize, HistoryReadValueId)> = results
                .iter()
                .enumerate()
                .filter(|(_, r)| !r.continuation_point.is_null() && !r.status_code.is_bad())
                .map(|(i, r)| {
                    let mut node = nodes_to_read[i].clone();
                    node.continuation_point = r.continuation_point.clone();
                    (i, node)
                })
                .collect();
            if open.is_empty() {
                return Ok(outcomes);
            }
            rounds += 1;
            if rounds > MAX_CONTINUATION_ROUNDS {
                tracing::warn!(rounds, "history continuation cap reached");
                return Err(Error::ContinuationExhausted);
            }

            let nodes: Vec<HistoryReadValueId> = open.iter().map(|(_, n)| n.clone()).collect();
            let next = self
                .history_read(details.clone(), timestamps_to_return, false, &nodes)
                .await?;
            // Rebuild `results` at the original indexes so the next round's
            // continuation scan lines up.
            let mut merged: Vec<HistoryReadResult> = results;
            for result in merged.iter_mut() {
                result.continuation_point = ByteString::NULL;
            }
            for ((index, _), result) in open.into_iter().zip(next) {
                let (status, data) = &mut outcomes[index];
                *status = result.status_code;
                if !result.status_code.is_bad() {
                    data.push(result.history_data.clone());
                }
                merged[index] = result;
            }
            results = merged;
        }
    }
}

fn require_batch<T>(items: &[T], operation: &str) -> Result<()> {
    if items.is_empty() {
        return Err(Error::usage(format!("{operation} needs at least one item")));
    }
    Ok(())
}
