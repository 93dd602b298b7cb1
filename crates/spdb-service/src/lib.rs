//! Server side of the Spdb protocol.
//!
//! [`SpdbService`] decodes request frames, runs them against a [`Backend`]
//! and encodes one reply per request. Backend and decode failures travel back
//! in the reply's `error` field.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use spdb_net::{MessageHandler, Reply};
use spdb_proto::{
    ids, AckReply, EraseRequest, GetReply, GetRequest, PutRequest, Request,
};
use spdb_serde::{to_wire_bytes, WireError, WireSerialize};
use spdb_store::{run_put, run_query, Backend};
use tracing::{debug, warn};

#[derive(Clone)]
pub struct SpdbService {
    backend: Arc<dyn Backend>,
}

impl SpdbService {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn put(&self, req: &PutRequest) -> AckReply {
        debug!(
            dir = %req.dir,
            mode = %req.mode,
            compression = %req.compression,
            n_chunks = req.batch.len(),
            "put"
        );
        let result = self
            .backend
            .open(&req.product.prod_label, req.product.prod_id, Path::new(&req.dir))
            .and_then(|mut handle| run_put(handle.as_mut(), req.mode, &req.batch));
        match result {
            Ok(_) => AckReply::ok(),
            Err(e) => {
                warn!(dir = %req.dir, error = %e, "put failed");
                AckReply::failed(e.to_string())
            }
        }
    }

    pub fn get(&self, req: &GetRequest) -> GetReply {
        debug!(dir = %req.dir, query = req.query.name(), "get");
        let result = self
            .backend
            .open("", 0, Path::new(&req.dir))
            .and_then(|handle| run_query(handle.as_ref(), &req.query, req.unique, req.refs_only));
        match result {
            Ok(out) => GetReply {
                error: None,
                product: out.product,
                compression: req.compression,
                batch: out.batch,
                times: out.times,
                time_list: out.time_list,
            },
            Err(e) => {
                warn!(dir = %req.dir, error = %e, "get failed");
                GetReply::failed(e.to_string())
            }
        }
    }

    pub fn erase(&self, req: &EraseRequest) -> AckReply {
        debug!(
            dir = %req.dir,
            valid_time = req.valid_time,
            data_type = req.data_type,
            data_type2 = req.data_type2,
            "erase"
        );
        let result = self
            .backend
            .open("", 0, Path::new(&req.dir))
            .and_then(|mut handle| handle.erase(req.valid_time, req.data_type, req.data_type2));
        match result {
            Ok(n) => {
                debug!(dir = %req.dir, removed = n, "erase done");
                AckReply::ok()
            }
            Err(e) => {
                warn!(dir = %req.dir, error = %e, "erase failed");
                AckReply::failed(e.to_string())
            }
        }
    }
}

/// A reply body that can carry an error in place of its result.
trait ReplyBody: WireSerialize {
    fn failed(msg: String) -> Self;
}

impl ReplyBody for AckReply {
    fn failed(msg: String) -> Self {
        AckReply::failed(msg)
    }
}

impl ReplyBody for GetReply {
    fn failed(msg: String) -> Self {
        GetReply::failed(msg)
    }
}

/// Encode a reply body, falling back to an error body of the same type if it
/// cannot be encoded.
fn encode_reply<T: ReplyBody>(id: i64, body: &T) -> Reply {
    match to_wire_bytes(body) {
        Ok(payload) => Reply::new(id, payload),
        Err(e) => {
            warn!(id, error = %e, "reply encoding failed");
            fallback_reply::<T>(id, &e)
        }
    }
}

fn fallback_reply<T: ReplyBody>(id: i64, err: &WireError) -> Reply {
    let body = T::failed(format!("reply encoding failed: {err}"));
    Reply::new(id, to_wire_bytes(&body).unwrap_or_default())
}

#[async_trait]
impl MessageHandler for SpdbService {
    async fn handle(&self, id: i64, payload: &[u8]) -> Reply {
        let request = match Request::decode(id, payload) {
            Ok(request) => request,
            Err(e) => {
                warn!(id, error = %e, "undecodable request");
                // Unknown ids are answered under their own id, which the
                // caller will reject as an unexpected reply.
                let reply_id = ids::reply_for(id).unwrap_or(id);
                return if reply_id == ids::GET_REPLY {
                    encode_reply(reply_id, &GetReply::failed(e.to_string()))
                } else {
                    encode_reply(reply_id, &AckReply::failed(e.to_string()))
                };
            }
        };

        match &request {
            Request::Put(req) => encode_reply(ids::PUT_REPLY, &self.put(req)),
            Request::Get(req) => encode_reply(ids::GET_REPLY, &self.get(req)),
            Request::Erase(req) => encode_reply(ids::ERASE_REPLY, &self.erase(req)),
        }
    }
}
