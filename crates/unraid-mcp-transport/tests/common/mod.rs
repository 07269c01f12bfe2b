//! A scriptable GraphQL-over-WebSocket server for integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use unraid_mcp_transport::TransportConfig;

/// How the mock server behaves.
#[derive(Clone)]
pub struct Script {
    /// Sub-protocol echoed in the upgrade response.
    pub subprotocol: &'static str,
    /// Answer `connection_init` with `connection_ack`.
    pub ack: bool,
    /// Send a server `ping` right after the ack.
    pub ping_after_ack: bool,
    /// Answer client pings.
    pub pong: bool,
    /// Push a result for every open subscription at this interval.
    pub tick: Option<Duration>,
    /// Drop the first connection without a close frame once it has seen
    /// this many subscribes.
    pub drop_first_after: Option<usize>,
    /// Precede every tick with a non-JSON frame, one of unknown type, and a
    /// result for an id nobody subscribed to.
    pub noise: bool,
    /// Send a legacy `ka` frame at this interval.
    pub keep_alive: Option<Duration>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            subprotocol: "graphql-transport-ws",
            ack: true,
            ping_after_ack: false,
            pong: true,
            tick: Some(Duration::from_millis(50)),
            drop_first_after: None,
            noise: false,
            keep_alive: None,
        }
    }
}

/// Every client frame received, grouped by connection in accept order.
pub type FrameLog = Arc<Mutex<Vec<Vec<Value>>>>;

pub struct MockServer {
    pub port: u16,
    pub frames: FrameLog,
}

impl MockServer {
    pub async fn start(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let frames: FrameLog = Arc::new(Mutex::new(Vec::new()));

        let log = frames.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let index = {
                    let mut log = log.lock().unwrap();
                    log.push(Vec::new());
                    log.len() - 1
                };
                tokio::spawn(serve(stream, script.clone(), index, log.clone()));
            }
        });

        Self { port, frames }
    }

    pub fn config(&self) -> unraid_mcp_transport::TransportConfigBuilder {
        TransportConfig::builder(format!("http://127.0.0.1:{}/graphql", self.port))
    }

    pub fn connections(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    /// Frames of one type received on one connection.
    pub fn frames_of(&self, connection: usize, kind: &str) -> Vec<Value> {
        self.frames
            .lock()
            .unwrap()
            .get(connection)
            .map(|frames| {
                frames
                    .iter()
                    .filter(|f| f["type"] == kind)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Ids of the subscribe (or start) frames seen on one connection.
    pub fn subscribed_ids(&self, connection: usize) -> Vec<String> {
        let mut ids: Vec<String> = ["subscribe", "start"]
            .iter()
            .flat_map(|kind| self.frames_of(connection, kind))
            .filter_map(|f| f["id"].as_str().map(str::to_string))
            .collect();
        ids.sort();
        ids
    }
}

async fn serve(stream: TcpStream, script: Script, index: usize, log: FrameLog) {
    let subprotocol = script.subprotocol;
    let echo_subprotocol = move |_req: &Request, mut resp: Response| -> Result<Response, ErrorResponse> {
        resp.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(subprotocol),
        );
        Ok(resp)
    };
    let upgraded = tokio_tungstenite::accept_hdr_async(stream, echo_subprotocol).await;
    let Ok(mut ws) = upgraded else {
        return;
    };

    let legacy = subprotocol == "graphql-ws";
    let result_type = if legacy { "data" } else { "next" };
    let mut open: Vec<String> = Vec::new();
    let mut subscribes = 0usize;
    let mut seq = 0u64;
    let mut tick = tokio::time::interval(script.tick.unwrap_or(Duration::from_secs(3600)));
    tick.tick().await;
    let mut keep_alive =
        tokio::time::interval(script.keep_alive.unwrap_or(Duration::from_secs(3600)));
    keep_alive.tick().await;

    loop {
        tokio::select! {
            msg = ws.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(_)) => continue,
                    _ => return,
                };
                let frame: Value = match serde_json::from_str(text.as_str()) {
                    Ok(frame) => frame,
                    Err(_) => continue,
                };
                log.lock().unwrap()[index].push(frame.clone());

                let id = frame["id"].as_str().unwrap_or_default().to_string();
                match frame["type"].as_str().unwrap_or_default() {
                    "connection_init" if script.ack => {
                        send(&mut ws, json!({"type": "connection_ack"})).await;
                        if script.ping_after_ack {
                            send(&mut ws, json!({"type": "ping", "payload": {"n": 1}})).await;
                        }
                    }
                    "subscribe" | "start" => {
                        let query = frame["payload"]["query"].as_str().unwrap_or_default();
                        if query.contains("bogus") {
                            let payload = json!([{"message": "Cannot query field \"bogus\" on type \"Subscription\"."}]);
                            send(&mut ws, json!({"type": "error", "id": id, "payload": payload})).await;
                            continue;
                        }
                        if query.contains("finite") {
                            send(&mut ws, json!({"type": result_type, "id": id, "payload": {"data": {"finite": 1}}})).await;
                            send(&mut ws, json!({"type": "complete", "id": id})).await;
                            continue;
                        }
                        open.push(id);
                        subscribes += 1;
                        if index == 0 && script.drop_first_after.is_some_and(|n| subscribes >= n) {
                            return;
                        }
                    }
                    "complete" | "stop" => open.retain(|open_id| *open_id != id),
                    "ping" if script.pong => {
                        send(&mut ws, json!({"type": "pong"})).await;
                    }
                    _ => {}
                }
            }
            _ = tick.tick(), if script.tick.is_some() => {
                if script.noise && !open.is_empty() {
                    let _ = ws.send(Message::Text("not json".into())).await;
                    send(&mut ws, json!({"type": "bogus", "id": open[0]})).await;
                    send(&mut ws, json!({"type": result_type, "id": "999", "payload": {"data": {}}})).await;
                }
                seq += 1;
                for id in &open {
                    let frame = json!({"type": result_type, "id": id, "payload": {"data": {"tick": seq}}});
                    send(&mut ws, frame).await;
                }
            }
            _ = keep_alive.tick(), if script.keep_alive.is_some() => {
                send(&mut ws, json!({"type": "ka"})).await;
            }
        }
    }
}

async fn send<S>(ws: &mut S, frame: Value)
where
    S: futures_util::Sink<Message> + Unpin,
{
    let _ = ws.send(Message::Text(frame.to_string().into())).await;
}

/// Poll `condition` until it holds or `limit` passes.
pub async fn eventually(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
