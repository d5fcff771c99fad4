#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_util::codec::Framed;

use remiro::codec::FrameCodec;
use remiro::frame::Frame;

/// Commands received by every fake in a test, in arrival order, as `"<name> <VERB> <args>"`.
pub type Log = Arc<Mutex<Vec<String>>>;

pub fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// An in-process stand-in for a Redis server, good enough for the handful of verbs the proxy
/// sends. Individual verbs can be scripted to answer with a fixed reply or to stall.
#[derive(Clone)]
pub struct FakeRedis {
    pub addr: SocketAddr,
    name: &'static str,
    data: Arc<Mutex<HashMap<Bytes, Bytes>>>,
    replies: Arc<Mutex<HashMap<String, Frame>>>,
    stalls: Arc<Mutex<HashMap<String, Duration>>>,
    log: Log,
}

impl FakeRedis {
    pub async fn start(name: &'static str, log: &Log) -> FakeRedis {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let fake = FakeRedis {
            addr: listener.local_addr().unwrap(),
            name,
            data: Arc::new(Mutex::new(HashMap::new())),
            replies: Arc::new(Mutex::new(HashMap::new())),
            stalls: Arc::new(Mutex::new(HashMap::new())),
            log: log.clone(),
        };

        let server = fake.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let server = server.clone();
                tokio::spawn(async move {
                    let mut framed = Framed::new(socket, FrameCodec::default());
                    while let Some(Ok(frame)) = framed.next().await {
                        let args = arguments(frame);
                        if let Some(stall) = server.stall_for(&args) {
                            tokio::time::sleep(stall).await;
                        }
                        let reply = server.handle(args);
                        if framed.send(reply).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });

        fake
    }

    pub fn insert(&self, key: &str, value: &str) {
        let key = Bytes::copy_from_slice(key.as_bytes());
        let value = Bytes::copy_from_slice(value.as_bytes());
        self.data.lock().unwrap().insert(key, value);
    }

    pub fn value(&self, key: &str) -> Option<Bytes> {
        self.data.lock().unwrap().get(key.as_bytes()).cloned()
    }

    /// Answer every `verb` with `reply` instead of executing it.
    pub fn reply_to(&self, verb: &str, reply: Frame) {
        self.replies
            .lock()
            .unwrap()
            .insert(verb.to_ascii_uppercase(), reply);
    }

    /// Hold every `verb` for `delay` before answering it.
    pub fn stall(&self, verb: &str, delay: Duration) {
        self.stalls
            .lock()
            .unwrap()
            .insert(verb.to_ascii_uppercase(), delay);
    }

    fn stall_for(&self, args: &[Bytes]) -> Option<Duration> {
        let verb = verb(args);
        self.stalls.lock().unwrap().get(&verb).copied()
    }

    fn handle(&self, args: Vec<Bytes>) -> Frame {
        let verb = verb(&args);

        // Connection setup chatter from client libraries is not interesting to tests.
        if verb != "CLIENT" {
            let mut line = vec![self.name.to_string(), verb.clone()];
            line.extend(
                args.iter()
                    .skip(1)
                    .map(|arg| String::from_utf8_lossy(arg).into_owned()),
            );
            self.log.lock().unwrap().push(line.join(" "));
        }

        if let Some(reply) = self.replies.lock().unwrap().get(&verb) {
            return reply.clone();
        }

        let mut data = self.data.lock().unwrap();
        match verb.as_str() {
            "PING" => Frame::Simple("PONG".to_string()),
            "CLIENT" => Frame::Simple("OK".to_string()),
            "GET" => data.get(&args[1]).cloned().map_or(Frame::Null, Frame::Bulk),
            "SET" => {
                let nx = args[3..].iter().any(|arg| arg.eq_ignore_ascii_case(b"NX"));
                if nx && data.contains_key(&args[1]) {
                    Frame::Null
                } else {
                    data.insert(args[1].clone(), args[2].clone());
                    Frame::Simple("OK".to_string())
                }
            }
            "DEL" => {
                let removed = args[1..]
                    .iter()
                    .filter(|key| data.remove(*key).is_some())
                    .count();
                Frame::Integer(removed as i64)
            }
            "INCR" => {
                let current = match data.get(&args[1]).map(|value| parse_integer(value)) {
                    Some(Some(n)) => n,
                    Some(None) => {
                        return Frame::error("ERR value is not an integer or out of range")
                    }
                    None => 0,
                };
                data.insert(args[1].clone(), Bytes::from((current + 1).to_string()));
                Frame::Integer(current + 1)
            }
            _ => Frame::error(format!("ERR unknown command '{}'", verb)),
        }
    }
}

fn arguments(frame: Frame) -> Vec<Bytes> {
    match frame {
        Frame::Array(parts) => parts
            .into_iter()
            .map(|part| match part {
                Frame::Bulk(bytes) => bytes,
                Frame::Simple(s) => Bytes::from(s),
                other => panic!("unexpected argument frame {:?}", other),
            })
            .collect(),
        other => panic!("unexpected command frame {:?}", other),
    }
}

fn parse_integer(value: &[u8]) -> Option<i64> {
    std::str::from_utf8(value).ok()?.parse().ok()
}

fn verb(args: &[Bytes]) -> String {
    String::from_utf8_lossy(&args[0]).to_ascii_uppercase()
}

/// A port nothing listens on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}
