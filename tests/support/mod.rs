//! Shared fixtures for relay integration tests
//!
//! - a wiremock credential service
//! - a scripted Gemini Live WebSocket server
//! - a relay server bound to an ephemeral port

#![allow(dead_code)]

use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::middleware;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, accept_async};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use speech_relay::{
    ServerConfig, middleware::connection_limit_middleware, routes, state::AppState,
};

pub type ClientSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const TEST_API_KEY: &str = "test-google-key";

/// Credential service that always issues `auth_tokens/integration`.
pub async fn token_service_ok() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1alpha/auth_tokens"))
        .and(header("x-goog-api-key", TEST_API_KEY))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "auth_tokens/integration",
            "expireTime": "2030-01-01T00:00:00Z"
        })))
        .mount(&server)
        .await;
    server
}

/// Credential service that refuses every request.
pub async fn token_service_rejecting() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1alpha/auth_tokens"))
        .respond_with(ResponseTemplate::new(403).set_body_string("API key not valid"))
        .mount(&server)
        .await;
    server
}

pub fn relay_config(token_service: &MockServer, gemini_addr: SocketAddr) -> ServerConfig {
    let mut config = ServerConfig::with_api_key(TEST_API_KEY);
    config.gemini_api_base_url = token_service.uri();
    config.gemini_ws_base_url = format!("ws://{gemini_addr}");
    config.gemini_model = "gemini-integration".to_string();
    config.setup_timeout_seconds = 2;
    config
}

/// Start the relay and return its address with the shared state.
pub async fn start_relay(config: ServerConfig) -> (SocketAddr, Arc<AppState>) {
    let state = AppState::new(config).unwrap();
    let relay_routes = routes::relay::create_relay_router().layer(
        middleware::from_fn_with_state(state.clone(), connection_limit_middleware),
    );
    let app = routes::api::create_api_router()
        .merge(relay_routes)
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    (addr, state)
}

pub async fn connect_client(relay: SocketAddr) -> ClientSocket {
    let (socket, _) = tokio_tungstenite::connect_async(format!("ws://{relay}/ws"))
        .await
        .unwrap();
    socket
}

/// Next text frame from the relay, skipping control frames.
pub async fn next_text(socket: &mut ClientSocket) -> String {
    loop {
        match socket.next().await.unwrap().unwrap() {
            Message::Text(text) => return text.to_string(),
            Message::Binary(data) => panic!("expected text, got {} binary bytes", data.len()),
            Message::Close(frame) => panic!("expected text, got close {frame:?}"),
            _ => continue,
        }
    }
}

/// 16 kHz mono PCM16 WAV file holding `samples`.
pub fn wav_bytes(samples: &[i16]) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for sample in samples {
            writer.write_sample(*sample).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

pub fn le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// What the scripted Gemini server saw during one turn.
#[derive(Debug, Default)]
pub struct ObservedTurn {
    pub setup: Value,
    pub request_uri: String,
    pub pcm: Vec<u8>,
    pub mime_types: Vec<String>,
}

/// Accept one Gemini connection, complete setup, collect a turn of audio and
/// answer with `reply` followed by `turnComplete`.
pub async fn gemini_single_turn(
    listener: TcpListener,
    reply: Vec<u8>,
) -> oneshot::Receiver<ObservedTurn> {
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        serve_single_turn(stream, reply, tx).await;
    });
    rx
}

/// Accept `sessions` Gemini connections in order, each served like
/// [`gemini_single_turn`].
pub async fn gemini_sessions(
    listener: TcpListener,
    reply: Vec<u8>,
    sessions: usize,
) -> Vec<oneshot::Receiver<ObservedTurn>> {
    let (senders, receivers): (Vec<_>, Vec<_>) =
        (0..sessions).map(|_| oneshot::channel()).unzip();
    tokio::spawn(async move {
        for tx in senders {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::spawn(serve_single_turn(stream, reply.clone(), tx));
        }
    });
    receivers
}

async fn serve_single_turn(
    stream: TcpStream,
    reply: Vec<u8>,
    tx: oneshot::Sender<ObservedTurn>,
) {
    let mut request_uri = String::new();
    let mut ws = tokio_tungstenite::accept_hdr_async(
        stream,
        |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            request_uri = request.uri().to_string();
            Ok(response)
        },
    )
    .await
    .unwrap();

    let mut observed = ObservedTurn {
        setup: next_json(&mut ws).await,
        request_uri,
        ..Default::default()
    };
    ws.send(Message::Text(r#"{"setupComplete":{}}"#.into()))
        .await
        .unwrap();

    loop {
        let message = next_json(&mut ws).await;
        let input = &message["realtimeInput"];
        if input["audioStreamEnd"] == true {
            break;
        }
        let audio = &input["audio"];
        observed
            .mime_types
            .push(audio["mimeType"].as_str().unwrap_or_default().to_string());
        observed.pcm.extend(
            BASE64
                .decode(audio["data"].as_str().unwrap())
                .unwrap(),
        );
    }

    let content = json!({
        "serverContent": {
            "modelTurn": { "parts": [{ "inlineData": {
                "mimeType": "audio/pcm;rate=24000",
                "data": BASE64.encode(&reply)
            } }] }
        }
    });
    ws.send(Message::Text(content.to_string().into()))
        .await
        .unwrap();
    ws.send(Message::Text(
        r#"{"serverContent":{"turnComplete":true}}"#.into(),
    ))
    .await
    .unwrap();

    let _ = tx.send(observed);

    // Hold the connection open until the relay closes it.
    while let Some(Ok(message)) = ws.next().await {
        if message.is_close() {
            break;
        }
    }
}

/// Accept one Gemini connection and complete setup, then hold it open.
pub async fn gemini_idle(listener: TcpListener) {
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let _setup = next_json(&mut ws).await;
        ws.send(Message::Text(r#"{"setupComplete":{}}"#.into()))
            .await
            .unwrap();
        while let Some(Ok(message)) = ws.next().await {
            if message.is_close() {
                break;
            }
        }
    });
}

async fn next_json<S>(ws: &mut S) -> Value
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Unpin,
{
    loop {
        match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Binary(data) => return serde_json::from_slice(&data).unwrap(),
            _ => continue,
        }
    }
}

/// MediaRecorder-style WebM/Opus recording of a 440 Hz tone, `frames` x 20 ms.
pub fn recorded_webm(frames: usize) -> Vec<u8> {
    use audiopus::coder::Encoder;
    use audiopus::{Application, Channels, SampleRate};

    let mut encoder = Encoder::new(SampleRate::Hz48000, Channels::Mono, Application::Voip).unwrap();
    let packets: Vec<Vec<u8>> = (0..frames)
        .map(|frame| {
            let pcm: Vec<i16> = (0..960)
                .map(|i| {
                    let t = (frame * 960 + i) as f32 / 48_000.0;
                    ((t * 440.0 * std::f32::consts::TAU).sin() * 8_000.0) as i16
                })
                .collect();
            let mut out = vec![0u8; 4000];
            let len = encoder.encode(&pcm, &mut out).unwrap();
            out.truncate(len);
            out
        })
        .collect();

    let mut opus_head = b"OpusHead".to_vec();
    opus_head.extend_from_slice(&[1, 1]);
    opus_head.extend_from_slice(&312u16.to_le_bytes());
    opus_head.extend_from_slice(&48_000u32.to_le_bytes());
    opus_head.extend_from_slice(&[0, 0, 0]);

    let mut track = ebml(0xD7, &[1]);
    track.extend(ebml(0x73C5, &[1]));
    track.extend(ebml(0x83, &[2]));
    track.extend(ebml(0x86, b"A_OPUS"));
    track.extend(ebml(0x63A2, &opus_head));
    track.extend(ebml(0xE1, &ebml(0x9F, &[1])));

    // Info with a 1 ms TimestampScale, then Tracks
    let mut segment = ebml(0x1549_A966, &ebml(0x2A_D7B1, &[0x0F, 0x42, 0x40]));
    segment.extend(ebml(0x1654_AE6B, &ebml(0xAE, &track)));
    for (index, chunk) in packets.chunks(10).enumerate() {
        let mut cluster = ebml(0xE7, &((index * 200) as u16).to_be_bytes());
        for (i, packet) in chunk.iter().enumerate() {
            let mut block = vec![0x81];
            block.extend_from_slice(&((i * 20) as i16).to_be_bytes());
            block.push(0x80);
            block.extend_from_slice(packet);
            cluster.extend(ebml(0xA3, &block));
        }
        segment.extend(ebml_unknown_size(0x1F43_B675, &cluster));
    }

    let mut out = ebml(0x1A45_DFA3, &ebml(0x4282, b"webm"));
    out.extend(ebml_unknown_size(0x1853_8067, &segment));
    out
}

fn ebml_id(id: u32) -> Vec<u8> {
    let bytes = id.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    bytes[skip..].to_vec()
}

fn ebml(id: u32, body: &[u8]) -> Vec<u8> {
    let mut out = ebml_id(id);
    out.push(0x01);
    out.extend_from_slice(&(body.len() as u64).to_be_bytes()[1..]);
    out.extend_from_slice(body);
    out
}

fn ebml_unknown_size(id: u32, body: &[u8]) -> Vec<u8> {
    let mut out = ebml_id(id);
    out.extend_from_slice(&[0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
    out.extend_from_slice(body);
    out
}
