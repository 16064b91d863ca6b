//! In-process mock of the bitmap service for integration tests.
//!
//! Speaks the real wire protocol over loopback TCP: handshake with session
//! id continuity, one JSON envelope frame per request, one frame per
//! response. Keeps actual sets behind the bitmap methods so facade tests
//! exercise end-to-end behavior, and exposes knobs to simulate the failure
//! modes the client must survive: connections severed mid-call, sessions
//! expired on reconnect, broken heartbeat replies.

#![allow(dead_code)]

use bitmap_rpc::protocol::{Frame, FrameCodec, FrameFlags};
use bitmap_rpc::transport::Endpoint;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_util::codec::Framed;

#[derive(Default)]
struct State {
    next_session: AtomicU32,
    next_object: AtomicU32,
    connections: AtomicUsize,
    /// Session ids the server still honors on reconnect.
    sessions: Mutex<HashSet<u32>>,
    /// Pretend every reconnecting client's session was garbage-collected.
    expire_sessions: AtomicBool,
    /// Close the connection instead of answering the next N requests.
    hangups: AtomicUsize,
    /// Answer pings with something other than "pong".
    bad_pong: AtomicBool,
    /// Hold each ping reply back for this long.
    ping_delay: Mutex<Option<Duration>>,
    /// Methods seen, in arrival order.
    calls: Mutex<Vec<String>>,
    bitmaps: Mutex<HashMap<(u32, u32), HashSet<u32>>>,
}

pub struct MockServer {
    addr: SocketAddr,
    state: Arc<State>,
    kill: broadcast::Sender<()>,
}

impl MockServer {
    pub async fn spawn() -> Self {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(State::default());
        let (kill, _) = broadcast::channel(4);

        let accept_state = Arc::clone(&state);
        let accept_kill = kill.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                accept_state.connections.fetch_add(1, Ordering::SeqCst);
                let state = Arc::clone(&accept_state);
                let kill = accept_kill.subscribe();
                tokio::spawn(serve_connection(stream, state, kill));
            }
        });

        Self { addr, state, kill }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::Tcp(self.addr.to_string())
    }

    /// Close every live connection, as if the server restarted.
    pub fn sever_all(&self) {
        let _ = self.kill.send(());
    }

    /// Stop honoring old session ids on reconnect.
    pub fn expire_sessions(&self, expire: bool) {
        self.state.expire_sessions.store(expire, Ordering::SeqCst);
    }

    /// Drop the connection instead of answering the next `n` requests.
    pub fn hangup_next(&self, n: usize) {
        self.state.hangups.store(n, Ordering::SeqCst);
    }

    /// Answer heartbeats with a wrong body.
    pub fn break_pong(&self, broken: bool) {
        self.state.bad_pong.store(broken, Ordering::SeqCst);
    }

    /// Hold each ping reply back for `delay`, simulating a slow server.
    pub fn delay_pings(&self, delay: Duration) {
        *self.state.ping_delay.lock() = Some(delay);
    }

    /// Total connections ever accepted (one per handshake).
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.state
            .calls
            .lock()
            .iter()
            .filter(|m| m.as_str() == method)
            .count()
    }
}

async fn serve_connection(
    stream: TcpStream,
    state: Arc<State>,
    mut kill: broadcast::Receiver<()>,
) {
    let mut framed = Framed::new(stream, FrameCodec);

    // Handshake: the client announces its last-known session id.
    let Some(Ok(hello)) = framed.next().await else {
        return;
    };
    let announced: u32 = hello
        .payload
        .as_deref()
        .and_then(|b| std::str::from_utf8(b).ok())
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0);

    let known = announced > 0 && state.sessions.lock().contains(&announced);
    let session = if known && !state.expire_sessions.load(Ordering::SeqCst) {
        announced
    } else {
        state.next_session.fetch_add(1, Ordering::SeqCst) + 1
    };
    state.sessions.lock().insert(session);

    // Banner frame (discarded by the client), then the assigned id.
    if framed
        .send(Frame::new(
            FrameFlags::CONTROL | FrameFlags::RAW,
            &b"bitmap-rpc mock"[..],
        ))
        .await
        .is_err()
    {
        return;
    }
    if framed
        .send(Frame::new(FrameFlags::NONE, session.to_string()))
        .await
        .is_err()
    {
        return;
    }

    loop {
        let request = tokio::select! {
            frame = framed.next() => match frame {
                Some(Ok(frame)) => frame,
                _ => return,
            },
            _ = kill.recv() => return, // severed
        };

        let Some(body) = request.payload.as_deref() else {
            return;
        };
        let Ok(envelope) = serde_json::from_slice::<Value>(body) else {
            return;
        };
        let method = envelope["m"].as_str().unwrap_or_default().to_string();
        let payload = envelope["p"].clone();
        state.calls.lock().push(method.clone());

        if state.hangups.load(Ordering::SeqCst) > 0 {
            state.hangups.fetch_sub(1, Ordering::SeqCst);
            return; // drop the connection without replying
        }

        if method == "Service.Ping" {
            let delay = *state.ping_delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
        }

        let reply = match dispatch(&state, &method, &payload) {
            Ok(value) => Frame::new(FrameFlags::NONE, serde_json::to_vec(&value).unwrap()),
            Err(message) => Frame::new(FrameFlags::ERROR, message),
        };
        if framed.send(reply).await.is_err() {
            return;
        }
    }
}

fn object_key(id: &Value) -> Result<(u32, u32), String> {
    let connection = id["connectionID"].as_u64().ok_or("bad id")? as u32;
    let object = id["objectID"].as_u64().ok_or("bad id")? as u32;
    Ok((connection, object))
}

fn dispatch(state: &State, method: &str, payload: &Value) -> Result<Value, String> {
    match method {
        "Service.Ping" => {
            if state.bad_pong.load(Ordering::SeqCst) {
                Ok(json!("dead"))
            } else if payload == &json!("ping") {
                Ok(json!("pong"))
            } else {
                Err("bad ping body".to_string())
            }
        }
        "Service.New" => {
            let connection = payload.as_u64().ok_or("bad connection id")? as u32;
            let object = state.next_object.fetch_add(1, Ordering::SeqCst) + 1;
            state
                .bitmaps
                .lock()
                .insert((connection, object), HashSet::new());
            Ok(json!(object))
        }
        "Service.Destruct" => {
            let key = object_key(payload)?;
            state.bitmaps.lock().remove(&key).ok_or("not found")?;
            Ok(json!(true))
        }
        "Service.Add" | "Service.CheckedAdd" => {
            let key = object_key(&payload["id"])?;
            let value = payload["value"].as_u64().ok_or("bad value")? as u32;
            let mut bitmaps = state.bitmaps.lock();
            let set = bitmaps.get_mut(&key).ok_or("not found")?;
            Ok(json!(set.insert(value)))
        }
        "Service.Remove" | "Service.CheckedRemove" => {
            let key = object_key(&payload["id"])?;
            let value = payload["value"].as_u64().ok_or("bad value")? as u32;
            let mut bitmaps = state.bitmaps.lock();
            let set = bitmaps.get_mut(&key).ok_or("not found")?;
            Ok(json!(set.remove(&value)))
        }
        "Service.AddMany" => {
            let key = object_key(&payload["id"])?;
            let values = payload["value"].as_array().ok_or("bad value")?;
            let mut bitmaps = state.bitmaps.lock();
            let set = bitmaps.get_mut(&key).ok_or("not found")?;
            for v in values {
                set.insert(v.as_u64().ok_or("bad value")? as u32);
            }
            Ok(json!(true))
        }
        "Service.Contains" => {
            let key = object_key(&payload["id"])?;
            let value = payload["value"].as_u64().ok_or("bad value")? as u32;
            let bitmaps = state.bitmaps.lock();
            let set = bitmaps.get(&key).ok_or("not found")?;
            Ok(json!(set.contains(&value)))
        }
        "Service.GetCardinality" => {
            let key = object_key(payload)?;
            let bitmaps = state.bitmaps.lock();
            let set = bitmaps.get(&key).ok_or("not found")?;
            Ok(json!(set.len() as u64))
        }
        "Service.IsEmpty" => {
            let key = object_key(payload)?;
            let bitmaps = state.bitmaps.lock();
            let set = bitmaps.get(&key).ok_or("not found")?;
            Ok(json!(set.is_empty()))
        }
        "Service.ToArray" => {
            let key = object_key(payload)?;
            let bitmaps = state.bitmaps.lock();
            let set = bitmaps.get(&key).ok_or("not found")?;
            let mut values: Vec<u32> = set.iter().copied().collect();
            values.sort_unstable();
            Ok(json!(values))
        }
        "Test.Echo" => Ok(payload.clone()),
        "Test.Err" => Err("kaboom".to_string()),
        other => Err(format!("unknown method {other}")),
    }
}

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
