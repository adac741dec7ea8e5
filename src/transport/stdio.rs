// Line-delimited JSON: every line is one `{"src", "dest", "body"}` message.
// The first message a node receives is `init`, which tells it who it is and
// who else is in the cluster. Bodies carrying `in_reply_to` answer a call this
// node made, everything else is a request handled on its own task.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use hashbrown::HashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tokio::{
    io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines},
    sync::{mpsc, oneshot},
};
use tracing::{debug, debug_span, trace, warn, Instrument};

use super::Transport;
use crate::{
    config::Config,
    error::Error,
    node::Node,
    wire::{Body, Message, NodeId, Reply, Request},
};

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Control {
    Init {
        node_id: NodeId,
        node_ids: Vec<NodeId>,
    },
}

type Waiters = Arc<Mutex<HashMap<u64, oneshot::Sender<Json>>>>;

/// Hands out message ids and queues encoded lines for the writer task.
struct Outbox {
    lines: mpsc::UnboundedSender<String>,
    last_id: AtomicU64,
}

impl Outbox {
    fn next_id(&self) -> u64 {
        self.last_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn send<P: Serialize>(&self, src: &str, dest: &str, body: &Body<P>) -> Result<(), Error> {
        let message = Message {
            src: src.to_owned(),
            dest: dest.to_owned(),
            body,
        };
        let line = serde_json::to_string(&message)?;
        self.lines.send(line).map_err(|_| Error::TransportClosed)
    }

    fn reply(
        &self,
        src: &str,
        dest: &str,
        in_reply_to: Option<u64>,
        reply: Reply,
    ) -> Result<(), Error> {
        let body = Body {
            msg_id: Some(self.next_id()),
            in_reply_to,
            payload: reply,
        };
        self.send(src, dest, &body)
    }
}

pub struct StdioTransport {
    id: NodeId,
    ids: Vec<NodeId>,
    outbox: Arc<Outbox>,
    waiters: Waiters,
}

#[async_trait]
impl Transport for StdioTransport {
    fn node_id(&self) -> &str {
        &self.id
    }

    fn node_ids(&self) -> &[NodeId] {
        &self.ids
    }

    async fn call(&self, dest: &str, request: Request) -> Result<Reply, Error> {
        let msg_id = self.outbox.next_id();
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().insert(msg_id, tx);
        let _waiting = Waiting {
            waiters: self.waiters.clone(),
            msg_id,
        };

        let body = Body {
            msg_id: Some(msg_id),
            in_reply_to: None,
            payload: request,
        };
        self.outbox.send(&self.id, dest, &body)?;

        let reply = rx.await.map_err(|_| Error::TransportClosed)?;
        Ok(serde_json::from_value(reply)?)
    }
}

/// Forgets a call's correlation id once the call is finished or abandoned.
struct Waiting {
    waiters: Waiters,
    msg_id: u64,
}

impl Drop for Waiting {
    fn drop(&mut self) {
        self.waiters.lock().remove(&self.msg_id);
    }
}

/// Serves a node on this process's stdin and stdout until stdin closes.
pub async fn run(config: Config) -> Result<(), Error> {
    serve(config, BufReader::new(io::stdin()), io::stdout()).await
}

/// Serves a node on `input` and `output` until `input` reaches end of file.
pub async fn serve<R, W>(config: Config, input: R, output: W) -> Result<(), Error>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    config.validate()?;
    let (lines_tx, lines_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(
        async move {
            if let Err(e) = write_lines(output, lines_rx).await {
                warn!("output closed: {}", e);
            }
        }
        .instrument(debug_span!("writer")),
    );
    let outbox = Arc::new(Outbox {
        lines: lines_tx,
        last_id: AtomicU64::new(0),
    });
    let waiters = Waiters::default();
    let mut lines = input.lines();

    let node = loop {
        let Some(Message { src, dest, body }) = next_message(&mut lines).await? else {
            return Ok(());
        };
        let msg_id = body.get("msg_id").and_then(Json::as_u64);
        match serde_json::from_value::<Control>(body) {
            Ok(Control::Init { node_id, node_ids }) => {
                debug!("initialised as {} in a cluster of {}", node_id, node_ids.len());
                let transport = Arc::new(StdioTransport {
                    id: node_id,
                    ids: node_ids,
                    outbox: outbox.clone(),
                    waiters: waiters.clone(),
                });
                let node = Node::new(transport, config.clone())?;
                outbox.reply(&dest, &src, msg_id, Reply::InitOk)?;
                break node;
            }
            Err(_) => {
                warn!("message from {} arrived before init", src);
                outbox.reply(&dest, &src, msg_id, Reply::from(&Error::NotInitialized))?;
            }
        }
    };

    while let Some(Message { src, dest, body }) = next_message(&mut lines).await? {
        if let Some(in_reply_to) = body.get("in_reply_to").and_then(Json::as_u64) {
            let waiter = waiters.lock().remove(&in_reply_to);
            match waiter {
                Some(waiter) => {
                    let _ = waiter.send(body);
                }
                None => trace!("nobody is waiting for reply {} from {}", in_reply_to, src),
            }
            continue;
        }

        let node = node.clone();
        let outbox = outbox.clone();
        tokio::spawn(async move {
            let msg_id = body.get("msg_id").and_then(Json::as_u64);
            let reply = match node.dispatch(&src, body).await {
                Ok(reply) => reply,
                Err(e) => Reply::from(&e),
            };
            if let Err(e) = outbox.reply(&dest, &src, msg_id, reply) {
                debug!("could not reply to {}: {}", src, e);
            }
        });
    }

    debug!("input closed, shutting down");
    node.shutdown();
    drop(node);
    drop(outbox);
    // give queued replies a moment to reach the output
    let _ = tokio::time::timeout(Duration::from_secs(1), writer).await;
    Ok(())
}

/// Reads the next well-formed message, skipping blank and unparseable lines.
/// Returns `None` at end of input.
async fn next_message<R>(lines: &mut Lines<R>) -> Result<Option<Message<Json>>, Error>
where
    R: AsyncBufRead + Unpin,
{
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(message) => return Ok(Some(message)),
            Err(e) => warn!("skipping unparseable line: {}", e),
        }
    }
    Ok(None)
}

async fn write_lines<W>(mut output: W, mut lines: mpsc::UnboundedReceiver<String>) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(mut line) = lines.recv().await {
        line.push('\n');
        output.write_all(line.as_bytes()).await?;
        output.flush().await?;
    }
    Ok(())
}
