// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

//! Integration tests for the HTTP/1.x server over real sockets.

use std::{io::Cursor, net::SocketAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use piuma_http::{BodyKind, HeaderField, Response, StatusCode};
use piuma_http1::{serve, serve_ranges, start, Handler, Request, ServerConfig};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::oneshot,
    task::JoinHandle,
    time::timeout,
};

const DOCUMENT: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

struct Application;

#[async_trait]
impl Handler for Application {
    async fn handle(&self, request: &mut Request<'_>) -> anyhow::Result<Response> {
        match request.path() {
            "/echo" => {
                let body = request.body.read_to_vec(1 << 16).await?;
                let mut response = Response::with_status(StatusCode::Ok);
                response.body = Some(BodyKind::Bytes(body));
                Ok(response)
            }
            "/document" => {
                if let Some(range) = request.headers.get_first(&HeaderField::RANGE) {
                    let served = serve_ranges(Cursor::new(DOCUMENT), DOCUMENT.len() as u64, range, Some("text/plain")).await?;
                    if let Some(response) = served {
                        return Ok(response);
                    }
                }

                let mut response = Response::with_sized_body(StatusCode::Ok, Cursor::new(DOCUMENT), DOCUMENT.len() as u64);
                response.headers.put_direct(HeaderField::ACCEPT_RANGES, "bytes");
                Ok(response)
            }
            _ => Ok(Response::not_found("not found")),
        }
    }
}

struct Server {
    address: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
}

async fn start_server() -> Server {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let (shutdown, receiver) = oneshot::channel::<()>();

    let config = ServerConfig::new(Arc::new(Application));
    let task = tokio::spawn(async move {
        serve(listener, config, async move {
            _ = receiver.await;
        }).await
    });

    Server { address, shutdown, task }
}

/// Reads a single response with a `Content-Length`, returning its head and
/// body.
async fn read_response(stream: &mut TcpStream) -> (String, Vec<u8>) {
    let mut data = Vec::new();
    let head_end = loop {
        if let Some(position) = data.windows(4).position(|window| window == b"\r\n\r\n") {
            break position;
        }
        let mut buffer = [0u8; 256];
        let read = stream.read(&mut buffer).await.unwrap();
        assert_ne!(read, 0, "connection closed before end of head");
        data.extend_from_slice(&buffer[..read]);
    };

    let head = String::from_utf8(data[..head_end].to_vec()).unwrap();
    let length: usize = head.lines()
        .find_map(|line| line.strip_prefix("content-length: "))
        .expect("content-length")
        .parse()
        .unwrap();

    let mut body = data[head_end + 4..].to_vec();
    while body.len() < length {
        let mut buffer = [0u8; 256];
        let read = stream.read(&mut buffer).await.unwrap();
        assert_ne!(read, 0, "connection closed before end of body");
        body.extend_from_slice(&buffer[..read]);
    }
    assert_eq!(body.len(), length);
    (head, body)
}

#[tokio::test]
async fn keep_alive_over_tcp() {
    let server = start_server().await;
    let mut stream = TcpStream::connect(server.address).await.unwrap();

    stream.write_all(b"GET /document HTTP/1.1\r\nHost: localhost\r\n\r\n").await.unwrap();
    let (head, body) = read_response(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 200 OK"));
    assert!(head.contains("accept-ranges: bytes"));
    assert_eq!(body, DOCUMENT);

    stream.write_all(b"GET /missing HTTP/1.1\r\nHost: localhost\r\n\r\n").await.unwrap();
    let (head, _) = read_response(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 404 Not Found"));

    _ = server.shutdown.send(());
    server.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn chunked_echo() {
    let server = start_server().await;
    let mut stream = TcpStream::connect(server.address).await.unwrap();

    stream.write_all(b"POST /echo HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n").await.unwrap();
    stream.write_all(b"6;name=value\r\npiuma \r\n").await.unwrap();
    stream.write_all(b"6\r\nserver\r\n0\r\nX-Trailer: ignored\r\n\r\n").await.unwrap();

    let (head, body) = read_response(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 200 OK"));
    assert_eq!(body, b"piuma server");

    _ = server.shutdown.send(());
    server.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn single_range() {
    let server = start_server().await;
    let mut stream = TcpStream::connect(server.address).await.unwrap();

    stream.write_all(b"GET /document HTTP/1.1\r\nRange: bytes=10-15\r\n\r\n").await.unwrap();
    let (head, body) = read_response(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 206 Partial Content"));
    assert!(head.contains("content-range: bytes 10-15/36"));
    assert_eq!(body, b"abcdef");

    stream.write_all(b"GET /document HTTP/1.1\r\nRange: bytes=100-\r\n\r\n").await.unwrap();
    let (head, _) = read_response(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 416 Range Not Satisfiable"));
    assert!(head.contains("content-range: bytes */36"));

    _ = server.shutdown.send(());
    server.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn multiple_ranges() {
    let server = start_server().await;
    let mut stream = TcpStream::connect(server.address).await.unwrap();

    stream.write_all(b"GET /document HTTP/1.1\r\nRange: bytes=0-1, -2\r\n\r\n").await.unwrap();
    let (head, body) = read_response(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 206 Partial Content"));

    let boundary = head.lines()
        .find_map(|line| line.strip_prefix("content-type: multipart/byteranges; boundary="))
        .expect("multipart content type")
        .to_string();
    let body = String::from_utf8(body).unwrap();
    assert!(body.contains("content-range: bytes 0-1/36\r\n\r\n01\r\n"));
    assert!(body.contains("content-range: bytes 34-35/36\r\n\r\nyz\r\n"));
    assert!(body.ends_with(&format!("--{boundary}--\r\n")));

    _ = server.shutdown.send(());
    server.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_closes_idle_connections() {
    let server = start_server().await;
    let mut stream = TcpStream::connect(server.address).await.unwrap();

    stream.write_all(b"GET /document HTTP/1.1\r\n\r\n").await.unwrap();
    read_response(&mut stream).await;

    _ = server.shutdown.send(());
    timeout(Duration::from_secs(5), server.task).await
        .expect("server should stop")
        .unwrap()
        .unwrap();

    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn start_binds_address() {
    let address = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
    let bound = address.to_string();
    let server = tokio::spawn(async move {
        start(&bound, ServerConfig::new(Arc::new(Application))).await
    });

    let mut stream = loop {
        match TcpStream::connect(address).await {
            Ok(stream) => break stream,
            Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
        }
    };

    stream.write_all(b"GET /document HTTP/1.1\r\n\r\n").await.unwrap();
    let (head, body) = read_response(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 200 OK"));
    assert_eq!(body, DOCUMENT);

    let error = start(&address.to_string(), ServerConfig::new(Arc::new(Application))).await.unwrap_err();
    assert_eq!(error.kind(), std::io::ErrorKind::AddrInUse);
    server.abort();
}
