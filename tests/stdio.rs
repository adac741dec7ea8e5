#![cfg(feature = "stdio")]

use std::time::Duration;

use epidemic::{transport::stdio, Config, Error, Strategy};
use serde_json::{json, Value as Json};
use tokio::{
    io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines},
    task::JoinHandle,
    time::{sleep, timeout},
};

/// Plays the cluster around one node served over in-memory pipes.
struct Client {
    input: DuplexStream,
    output: Lines<BufReader<DuplexStream>>,
    server: JoinHandle<Result<(), Error>>,
}

impl Client {
    fn start() -> Self {
        let (input, server_input) = duplex(64 * 1024);
        let (server_output, output) = duplex(64 * 1024);
        let server = tokio::spawn(stdio::serve(
            Config::default(),
            BufReader::new(server_input),
            server_output,
        ));
        Self {
            input,
            output: BufReader::new(output).lines(),
            server,
        }
    }

    async fn send_line(&mut self, line: &str) {
        self.input.write_all(line.as_bytes()).await.unwrap();
        self.input.write_all(b"\n").await.unwrap();
    }

    async fn send(&mut self, src: &str, body: Json) {
        let message = json!({"src": src, "dest": "n0", "body": body});
        self.send_line(&message.to_string()).await;
    }

    async fn recv(&mut self) -> Json {
        let line = timeout(Duration::from_secs(3), self.output.next_line())
            .await
            .expect("no output from node")
            .unwrap()
            .expect("output closed");
        serde_json::from_str(&line).unwrap()
    }

    async fn init(&mut self) {
        self.send(
            "c0",
            json!({"type": "init", "msg_id": 1, "node_id": "n0", "node_ids": ["n0", "n1"]}),
        )
        .await;
        let reply = self.recv().await;
        assert_eq!(reply["src"], "n0");
        assert_eq!(reply["dest"], "c0");
        assert_eq!(reply["body"]["type"], "init_ok");
        assert_eq!(reply["body"]["in_reply_to"], 1);
    }
}

#[tokio::test(start_paused = true)]
async fn broadcast_session() {
    let mut client = Client::start();
    client.init().await;

    client
        .send(
            "c1",
            json!({"type": "topology", "msg_id": 2, "topology": {"n0": ["n1"], "n1": ["n0"]}}),
        )
        .await;
    let reply = client.recv().await;
    assert_eq!(reply["body"]["type"], "topology_ok");
    assert_eq!(reply["body"]["in_reply_to"], 2);

    client
        .send("c1", json!({"type": "broadcast", "msg_id": 3, "message": 5}))
        .await;
    let mut lines = vec![client.recv().await, client.recv().await];
    lines.sort_by_key(|line| line["dest"].as_str().map(str::to_owned));

    let (ack, forward) = (&lines[0], &lines[1]);
    assert_eq!(ack["dest"], "c1");
    assert_eq!(ack["body"]["type"], "broadcast_ok");
    assert_eq!(ack["body"]["in_reply_to"], 3);
    assert_eq!(forward["dest"], "n1");
    assert_eq!(forward["body"]["type"], "broadcast");
    assert_eq!(forward["body"]["message"], 5);

    let forwarded_id = forward["body"]["msg_id"].clone();
    client
        .send(
            "n1",
            json!({"type": "broadcast_ok", "msg_id": 1, "in_reply_to": forwarded_id}),
        )
        .await;
    sleep(Duration::from_secs(5)).await;

    // an acknowledged delivery is never resent, so the next line is the read
    client
        .send("c1", json!({"type": "read", "msg_id": 4}))
        .await;
    let reply = client.recv().await;
    assert_eq!(
        reply["body"],
        json!({"type": "read_ok", "messages": [5], "msg_id": reply["body"]["msg_id"], "in_reply_to": 4})
    );
}

#[tokio::test(start_paused = true)]
async fn unanswered_forward_is_resent() {
    let mut client = Client::start();
    client.init().await;
    client
        .send(
            "c1",
            json!({"type": "topology", "msg_id": 2, "topology": {"n0": ["n1"]}}),
        )
        .await;
    client.recv().await;

    client
        .send("n1", json!({"type": "broadcast", "msg_id": 3, "message": 1}))
        .await;
    // n1 sent the value, so the only line is the ack
    assert_eq!(client.recv().await["body"]["type"], "broadcast_ok");

    client
        .send("c1", json!({"type": "broadcast", "msg_id": 4, "message": 2}))
        .await;
    let mut forwards = Vec::new();
    for _ in 0..4 {
        let line = client.recv().await;
        if line["dest"] == "n1" {
            forwards.push(line);
        }
    }
    assert_eq!(forwards.len(), 3);
    assert!(forwards.iter().all(|line| line["body"]["message"] == 2));
    let ids: Vec<&Json> = forwards.iter().map(|line| &line["body"]["msg_id"]).collect();
    assert_ne!(ids[0], ids[1]);
    assert_ne!(ids[1], ids[2]);
}

#[tokio::test(start_paused = true)]
async fn errors_are_reported_with_codes() {
    let mut client = Client::start();

    client
        .send("c1", json!({"type": "read", "msg_id": 1}))
        .await;
    let reply = client.recv().await;
    assert_eq!(reply["body"]["type"], "error");
    assert_eq!(reply["body"]["code"], 11);
    assert_eq!(reply["body"]["in_reply_to"], 1);

    client.send_line("this is not json").await;
    client.send_line("").await;
    client.init().await;

    client
        .send("c1", json!({"type": "broadcast", "msg_id": 2, "message": "five"}))
        .await;
    let reply = client.recv().await;
    assert_eq!(reply["body"]["type"], "error");
    assert_eq!(reply["body"]["code"], 12);
    assert_eq!(reply["body"]["in_reply_to"], 2);

    client
        .send("c1", json!({"type": "echo", "msg_id": 3, "echo": "hi"}))
        .await;
    let reply = client.recv().await;
    assert_eq!(reply["body"]["code"], 10);
    assert_eq!(reply["body"]["in_reply_to"], 3);

    client
        .send("c1", json!({"type": "read", "msg_id": 4}))
        .await;
    let reply = client.recv().await;
    assert_eq!(reply["body"]["type"], "read_ok");
    assert_eq!(reply["body"]["messages"], json!([]));
}

#[tokio::test(start_paused = true)]
async fn end_of_input_stops_the_node() {
    let mut client = Client::start();
    client.init().await;

    let Client { input, server, .. } = client;
    drop(input);
    let outcome = timeout(Duration::from_secs(5), server).await;
    assert!(matches!(outcome, Ok(Ok(Ok(())))));
}

#[tokio::test(start_paused = true)]
async fn end_of_input_before_init_is_not_an_error() {
    let Client { input, server, .. } = Client::start();
    drop(input);
    let outcome = timeout(Duration::from_secs(5), server).await;
    assert!(matches!(outcome, Ok(Ok(Ok(())))));
}

#[tokio::test(start_paused = true)]
async fn invalid_config_is_refused_before_reading_input() {
    let config = Config::builder()
        .strategy(Strategy::Batched {
            flush_interval: Duration::ZERO,
        })
        .build();
    let (_input, server_input) = duplex(1024);
    let (server_output, _output) = duplex(1024);

    let outcome = timeout(
        Duration::from_secs(1),
        stdio::serve(config, BufReader::new(server_input), server_output),
    )
    .await;

    assert!(matches!(outcome, Ok(Err(Error::InvalidConfig(_)))));
}
