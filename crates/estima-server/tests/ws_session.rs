use std::sync::Arc;
use std::time::Duration;

use estima_server::{start, DiskFileStore, EventRouter, ServerConfig, ServerHandle};
use estima_session::{SessionPolicy, SessionRegistry};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Peer {
    ws: Ws,
    id: String,
    token: String,
}

impl Peer {
    async fn connect(port: u16) -> Self {
        let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{port}/ws")).await.unwrap();
        let welcome = next_json(&mut ws).await;
        assert_eq!(welcome["type"], "connected");
        Self {
            id: welcome["connectionId"].as_str().unwrap().to_string(),
            token: welcome["token"].as_str().unwrap().to_string(),
            ws,
        }
    }

    async fn send(&mut self, mut event: Value) {
        event["token"] = json!(self.token);
        self.ws.send(Message::Text(event.to_string().into())).await.unwrap();
    }

    async fn recv(&mut self) -> Value {
        next_json(&mut self.ws).await
    }

    /// Skip frames until one of type `kind` arrives.
    async fn expect(&mut self, kind: &str) -> Value {
        loop {
            let msg = self.recv().await;
            if msg["type"] == kind {
                return msg;
            }
        }
    }
}

async fn next_json(ws: &mut Ws) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn boot() -> (ServerHandle, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        upload_dir: tmp.path().to_path_buf(),
        ..ServerConfig::default()
    };
    let router = Arc::new(EventRouter::new(SessionRegistry::new(SessionPolicy::default())));
    let store = Arc::new(DiskFileStore::new(
        &config.upload_dir,
        config.allowed_avatar_types.clone(),
        config.max_avatar_bytes,
    ));
    (start(config, router, store).await.unwrap(), tmp)
}

fn join(name: &str) -> Value {
    json!({"type": "join-session", "sessionId": "TEAM42", "displayName": name})
}

fn vote(value: Value) -> Value {
    json!({"type": "submit-vote", "sessionId": "TEAM42", "value": value})
}

#[tokio::test]
async fn two_players_vote_and_reveal() {
    let (handle, _tmp) = boot().await;
    let mut ada = Peer::connect(handle.port).await;
    let mut bo = Peer::connect(handle.port).await;

    ada.send(join("Ada")).await;
    let snapshot = ada.expect("session-snapshot").await;
    assert_eq!(snapshot["session"]["sessionId"], "TEAM42");
    assert_eq!(snapshot["session"]["activeDeck"]["name"], "modifiedFibonacci");

    bo.send(join("Bo")).await;
    bo.expect("session-snapshot").await;
    let joined = ada.expect("participant-joined").await;
    assert_eq!(joined["participant"]["displayName"], "Bo");

    ada.send(vote(json!(5))).await;
    let count = bo.expect("vote-count").await;
    assert_eq!(count["current"], 1);
    assert_eq!(count["total"], 2);

    bo.send(vote(json!("5"))).await;
    for peer in [&mut ada, &mut bo] {
        let complete = peer.expect("voting-complete").await;
        assert_eq!(complete["votes"][&peer.id], "5");
        assert_eq!(complete["result"]["mode"], "5");
        assert_eq!(complete["result"]["average"], 5.0);
        assert_eq!(complete["result"]["consensusReached"], true);
        peer.expect("celebrate-consensus").await;
    }

    ada.send(vote(json!("8"))).await;
    let err = ada.expect("error").await;
    assert_eq!(err["code"], "VOTING_CLOSED");

    handle.shutdown().await;
}

#[tokio::test]
async fn wrong_token_is_rejected() {
    let (handle, _tmp) = boot().await;
    let mut ada = Peer::connect(handle.port).await;

    let mut event = join("Ada");
    event["token"] = json!("0".repeat(32));
    ada.ws.send(Message::Text(event.to_string().into())).await.unwrap();
    let err = ada.recv().await;
    assert_eq!(err["type"], "error");
    assert_eq!(err["code"], "AUTHENTICITY_REJECTED");

    ada.ws.send(Message::Text("not json".into())).await.unwrap();
    let err = ada.recv().await;
    assert_eq!(err["code"], "INVALID_REQUEST");

    handle.shutdown().await;
}

#[tokio::test]
async fn closing_socket_disconnects_and_reveals() {
    let (handle, _tmp) = boot().await;
    let mut ada = Peer::connect(handle.port).await;
    let mut bo = Peer::connect(handle.port).await;

    ada.send(join("Ada")).await;
    ada.expect("session-snapshot").await;
    bo.send(join("Bo")).await;
    bo.expect("session-snapshot").await;

    ada.send(vote(json!("13"))).await;
    ada.expect("vote-count").await;

    let bo_id = bo.id.clone();
    bo.ws.close(None).await.unwrap();

    let gone = ada.expect("participant-disconnected").await;
    assert_eq!(gone["participantId"], bo_id);
    let complete = ada.expect("voting-complete").await;
    assert_eq!(complete["votes"][&ada.id], "13");

    handle.shutdown().await;
}
