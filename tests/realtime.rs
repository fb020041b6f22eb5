use std::net::{SocketAddr, TcpListener};
use std::time::Duration;

use chatmind::api::{build_router, AppState};
use chatmind::config::Config;
use chatmind::store::Filter;
use futures::{SinkExt, StreamExt};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

async fn spawn_server() -> (SocketAddr, JoinHandle<()>, AppState, tempfile::TempDir) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    listener.set_nonblocking(true).unwrap();

    let tmp = tempfile::tempdir().unwrap();
    let config = Config {
        bind: addr.to_string(),
        data_dir: tmp.path().to_path_buf(),
        logging_enabled: false,
    };
    let state = AppState::new(config).unwrap();
    let app = build_router(state.clone());
    let server = tokio::spawn(async move {
        axum::Server::from_tcp(listener)
            .unwrap()
            .serve(app.into_make_service())
            .await
            .unwrap();
    });
    (addr, server, state, tmp)
}

async fn make_room(client: &reqwest::Client, addr: SocketAddr) -> String {
    let resp = client
        .post(format!("http://{}/chats/group", addr))
        .json(&serde_json::json!({"name": "Team", "member_ids": ["u1", "u2"]}))
        .send()
        .await
        .unwrap();
    resp.json::<serde_json::Value>().await.unwrap()["room_id"]
        .as_str()
        .unwrap()
        .to_string()
}

type WsClient =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn next_text(ws: &mut WsClient) -> serde_json::Value {
    let msg = timeout(Duration::from_secs(2), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    serde_json::from_str(&msg.into_text().unwrap()).unwrap()
}

#[tokio::test]
async fn message_fans_out_to_all_subscribers() {
    let (addr, server, state, _tmp) = spawn_server().await;
    let client = reqwest::Client::new();
    let room_id = make_room(&client, addr).await;

    let (mut c1, _) = connect_async(format!("ws://{}/ws/rooms/{}", addr, room_id))
        .await
        .unwrap();
    let (mut c2, _) = connect_async(format!("ws://{}/ws/rooms/{}", addr, room_id))
        .await
        .unwrap();
    // let the server-side subscription tasks settle
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(state.registry.subscribers_of(&room_id).len(), 2);

    let resp = client
        .post(format!("http://{}/messages", addr))
        .json(&serde_json::json!({"room_id": room_id, "sender_id": "u1", "content": "hi"}))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    for ws in [&mut c1, &mut c2] {
        let event = next_text(ws).await;
        assert_eq!(event["type"], "message");
        assert_eq!(event["payload"]["room_id"].as_str().unwrap(), room_id);
        assert_eq!(event["payload"]["sender_id"], "u1");
        assert_eq!(event["payload"]["content"], "hi");
        assert!(event["payload"]["id"].as_str().is_some());
    }

    assert_eq!(
        state
            .store
            .find("message", &Filter::eq("room_id", room_id.as_str()), None, None)
            .unwrap()
            .len(),
        1
    );

    server.abort();
}

#[tokio::test]
async fn subscribers_in_other_rooms_stay_quiet() {
    let (addr, server, _state, _tmp) = spawn_server().await;
    let client = reqwest::Client::new();
    let room_a = make_room(&client, addr).await;
    let room_b = make_room(&client, addr).await;

    let (mut in_a, _) = connect_async(format!("ws://{}/ws/rooms/{}", addr, room_a))
        .await
        .unwrap();
    let (mut in_b, _) = connect_async(format!("ws://{}/ws/rooms/{}", addr, room_b))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    client
        .post(format!("http://{}/messages", addr))
        .json(&serde_json::json!({"room_id": room_a, "sender_id": "u1", "content": "only a"}))
        .send()
        .await
        .unwrap();

    let event = next_text(&mut in_a).await;
    assert_eq!(event["payload"]["content"], "only a");
    assert!(timeout(Duration::from_millis(300), in_b.next()).await.is_err());

    server.abort();
}

#[tokio::test]
async fn dead_subscriber_never_blocks_the_sender() {
    let (addr, server, state, _tmp) = spawn_server().await;
    let client = reqwest::Client::new();
    let room_id = make_room(&client, addr).await;

    let (c1, _) = connect_async(format!("ws://{}/ws/rooms/{}", addr, room_id))
        .await
        .unwrap();
    let (mut c2, _) = connect_async(format!("ws://{}/ws/rooms/{}", addr, room_id))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    // c1 goes away abnormally: no close frame, the connection is just dropped
    drop(c1);

    for content in ["first", "second"] {
        let resp = client
            .post(format!("http://{}/messages", addr))
            .json(&serde_json::json!({"room_id": room_id, "sender_id": "u1", "content": content}))
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success());
        let event = next_text(&mut c2).await;
        assert_eq!(event["payload"]["content"], content);
    }

    // the stale connection is gone from the registry
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(state.registry.subscribers_of(&room_id).len(), 1);

    server.abort();
}

#[tokio::test]
async fn inbound_text_is_echoed() {
    let (addr, server, state, _tmp) = spawn_server().await;
    let client = reqwest::Client::new();
    let room_id = make_room(&client, addr).await;

    let (mut ws, _) = connect_async(format!("ws://{}/ws/rooms/{}", addr, room_id))
        .await
        .unwrap();
    ws.send(WsMessage::Text("ping".into())).await.unwrap();
    let event = next_text(&mut ws).await;
    assert_eq!(event["type"], "echo");
    assert_eq!(event["payload"], "ping");

    // closing the last subscriber empties the room entry
    ws.close(None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(state.registry.room_count(), 0);

    server.abort();
}
