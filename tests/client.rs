//! End-to-end tests against scripted TCP servers.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use brook::body::BodySource;
use brook::{Client, StatusCode, Uri};
use http_body_util::BodyExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Reads one full request (head plus any `Content-Length` body) and returns
/// its raw bytes. Returns `None` when the peer closed before sending one.
async fn read_request(stream: &mut TcpStream) -> Option<Vec<u8>> {
    let mut buf = Vec::new();
    loop {
        if let Some(head_end) = find_head_end(&buf) {
            let need = head_end + content_length(&buf[..head_end]);
            while buf.len() < need {
                let mut chunk = [0u8; 4096];
                let n = stream.read(&mut chunk).await.unwrap();
                assert!(n > 0, "peer closed mid-body");
                buf.extend_from_slice(&chunk[..n]);
            }
            return Some(buf);
        }
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            assert!(buf.is_empty(), "peer closed mid-head");
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

fn content_length(head: &[u8]) -> usize {
    let head = std::str::from_utf8(head).unwrap();
    head.lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse().unwrap())
        })
        .unwrap_or(0)
}

async fn listener() -> (TcpListener, Uri, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let uri: Uri = format!("http://{}/", addr).parse().unwrap();
    (listener, uri, addr)
}

fn uri_with_path(addr: SocketAddr, path: &str) -> Uri {
    format!("http://{}{}", addr, path).parse().unwrap()
}

#[tokio::test]
async fn basic_get_buffered_body() {
    let (listener, uri, _) = listener().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let request = read_request(&mut stream).await.unwrap();
        let text = String::from_utf8(request).unwrap();
        assert!(text.starts_with("GET / HTTP/1.1\r\n"), "{}", text);
        assert!(text.to_ascii_lowercase().contains("host: 127.0.0.1"), "{}", text);
        assert!(text.to_ascii_lowercase().contains("accept-encoding: gzip, deflate"));

        stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello")
            .await
            .unwrap();
        stream.flush().await.unwrap();
    });

    let client = Client::new();
    let response = client
        .request(uri, |spec| {
            spec.max_content_length(1024u64);
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(&response.body()[..], b"hello");
    server.await.unwrap();
}

#[tokio::test]
async fn pool_reuse_after_drained_response() {
    let (listener, uri, _) = listener().await;
    let connections = Arc::new(AtomicUsize::new(0));
    let seen = connections.clone();
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        seen.fetch_add(1, Ordering::SeqCst);
        // Two requests on the same connection.
        for body in [&b"one"[..], &b"two"[..]] {
            read_request(&mut stream).await.unwrap();
            let head = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", body.len());
            stream.write_all(head.as_bytes()).await.unwrap();
            stream.write_all(body).await.unwrap();
            stream.flush().await.unwrap();
        }
    });

    let client = Client::new();
    let first = client.get(uri.clone()).await.unwrap();
    assert_eq!(&first.body()[..], b"one");
    let second = client.get(uri).await.unwrap();
    assert_eq!(&second.body()[..], b"two");

    server.await.unwrap();
    assert_eq!(connections.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn chunked_stream_delivers_in_order() {
    let (listener, uri, _) = listener().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
            .await
            .unwrap()
            .unwrap();
        read_request(&mut stream).await.unwrap();

        stream
            .write_all(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n")
            .await
            .unwrap();
        for fill in [b'a', b'b', b'c'] {
            let chunk = vec![fill; 4096];
            stream.write_all(b"1000\r\n").await.unwrap();
            stream.write_all(&chunk).await.unwrap();
            stream.write_all(b"\r\n").await.unwrap();
            stream.flush().await.unwrap();
        }
        stream.write_all(b"0\r\n\r\n").await.unwrap();
        stream.flush().await.unwrap();
    });

    let client = Client::new();
    let response = client
        .request_stream(uri, |spec| {
            spec.response_max_chunk_size(4096);
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut body = response.into_body();
    let mut collected = Vec::new();
    while let Some(frame) = body.frame().await {
        let data = frame.unwrap().into_data().unwrap();
        assert!(data.len() <= 4096, "chunk of {} bytes", data.len());
        assert!(!data.is_empty(), "empty chunks are never delivered");
        collected.extend_from_slice(&data);
    }

    let mut expected = vec![b'a'; 4096];
    expected.extend_from_slice(&[b'b'; 4096]);
    expected.extend_from_slice(&[b'c'; 4096]);
    assert_eq!(collected, expected);
    server.await.unwrap();
}

#[tokio::test]
async fn redirect_degrades_post_to_get() {
    let (listener, _, addr) = listener().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        let first = String::from_utf8(read_request(&mut stream).await.unwrap()).unwrap();
        assert!(first.starts_with("POST /a HTTP/1.1\r\n"), "{}", first);
        assert!(first.ends_with("payload"), "{}", first);
        stream
            .write_all(b"HTTP/1.1 302 Found\r\nLocation: /b\r\nContent-Length: 0\r\n\r\n")
            .await
            .unwrap();

        // The degraded follow-up arrives on the pooled connection.
        let second = String::from_utf8(read_request(&mut stream).await.unwrap()).unwrap();
        assert!(second.starts_with("GET /b HTTP/1.1\r\n"), "{}", second);
        assert!(!second.to_ascii_lowercase().contains("content-length"), "{}", second);
        assert!(second.ends_with("\r\n\r\n"), "{}", second);
        stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\ndone")
            .await
            .unwrap();
        stream.flush().await.unwrap();
    });

    let client = Client::new();
    let response = client
        .request(uri_with_path(addr, "/a"), |spec| {
            spec.method(brook::Method::POST).body_bytes(&b"payload"[..]);
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(&response.body()[..], b"done");
    server.await.unwrap();
}

#[tokio::test]
async fn redirect_budget_surfaces_last_response() {
    let (listener, uri, _) = listener().await;
    let requests = Arc::new(AtomicUsize::new(0));
    let counted = requests.clone();
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        // original + 2 hops, all on one keep-alive connection
        for _ in 0..3 {
            read_request(&mut stream).await.unwrap();
            counted.fetch_add(1, Ordering::SeqCst);
            stream
                .write_all(b"HTTP/1.1 302 Found\r\nLocation: /\r\nContent-Length: 0\r\n\r\n")
                .await
                .unwrap();
            stream.flush().await.unwrap();
        }
    });

    let client = Client::new();
    let response = client
        .request(uri, |spec| {
            spec.redirects(2);
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FOUND);
    server.await.unwrap();
    assert_eq!(requests.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn zero_redirects_surfaces_first_response() {
    let (listener, uri, _) = listener().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_request(&mut stream).await.unwrap();
        stream
            .write_all(b"HTTP/1.1 302 Found\r\nLocation: /next\r\nContent-Length: 0\r\n\r\n")
            .await
            .unwrap();
        stream.flush().await.unwrap();
    });

    let client = Client::new();
    let response = client
        .request(uri, |spec| {
            spec.redirects(0);
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers().get("location").unwrap(), "/next");
    server.await.unwrap();
}

#[tokio::test]
async fn redirect_decision_can_decline() {
    let (listener, uri, _) = listener().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_request(&mut stream).await.unwrap();
        stream
            .write_all(b"HTTP/1.1 302 Found\r\nLocation: /next\r\nContent-Length: 0\r\n\r\n")
            .await
            .unwrap();
        stream.flush().await.unwrap();
    });

    let client = Client::new();
    let response = client
        .request(uri, |spec| {
            spec.on_redirect(|_parts| None);
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    server.await.unwrap();
}

#[tokio::test]
async fn read_timeout_mid_stream() {
    let (listener, uri, _) = listener().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_request(&mut stream).await.unwrap();
        stream
            .write_all(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nping\r\n")
            .await
            .unwrap();
        stream.flush().await.unwrap();
        // Stall well past the client's read timeout.
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let client = Client::new();
    let response = client
        .request_stream(uri, |spec| {
            spec.read_timeout(Duration::from_millis(100));
            Ok(())
        })
        .await
        .unwrap();

    let mut body = response.into_body();
    let first = body.frame().await.unwrap().unwrap().into_data().unwrap();
    assert_eq!(&first[..], b"ping");

    let err = body.frame().await.unwrap().unwrap_err();
    assert!(err.is_read_timeout(), "{:?}", err);
    assert!(err.is_timeout());
    server.await.unwrap();
}

#[tokio::test]
async fn unpolled_body_closes_connection() {
    let (listener, uri, _) = listener().await;
    let connections = Arc::new(AtomicUsize::new(0));
    let seen = connections.clone();
    let server = tokio::spawn(async move {
        for _ in 0..2 {
            let (mut stream, _) = listener.accept().await.unwrap();
            seen.fetch_add(1, Ordering::SeqCst);
            read_request(&mut stream).await.unwrap();
            // Two chunks are on the wire before the caller ever polls.
            stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 8\r\n\r\nabcdefgh")
                .await
                .unwrap();
            stream.flush().await.unwrap();
            // The client must close rather than pool this connection.
            let mut rest = Vec::new();
            let n = stream.read_to_end(&mut rest).await.unwrap();
            assert_eq!(n, 0, "expected close, got {:?}", rest);
        }
    });

    let client = Client::new();
    let response = client.request_stream(uri.clone(), |_| Ok(())).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    // Never subscribe; the buffered chunks must be released on drop.
    drop(response);

    // A fresh request cannot see the abandoned transport.
    let response = client.request_stream(uri, |_| Ok(())).await.unwrap();
    drop(response);

    server.await.unwrap();
    assert_eq!(connections.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn post_body_round_trips() {
    let (listener, uri, _) = listener().await;
    let payload: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
    let expected = payload.clone();
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let request = read_request(&mut stream).await.unwrap();
        let head_end = find_head_end(&request).unwrap();
        assert_eq!(&request[head_end..], &expected[..]);

        stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
            .await
            .unwrap();
        stream.flush().await.unwrap();
    });

    let client = Client::new();
    let body = bytes::Bytes::from(payload);
    let response = client
        .request(uri, move |spec| {
            spec.method(brook::Method::POST).body_bytes(body.clone());
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(&response.body()[..], b"ok");
    server.await.unwrap();
}

#[tokio::test]
async fn unknown_length_body_is_chunked() {
    let (listener, uri, _) = listener().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut raw = Vec::new();
        // Head, then chunked frames, then the terminator.
        loop {
            let mut chunk = [0u8; 4096];
            let n = stream.read(&mut chunk).await.unwrap();
            raw.extend_from_slice(&chunk[..n]);
            if raw.windows(5).any(|w| w == b"0\r\n\r\n") {
                break;
            }
        }
        let text = String::from_utf8(raw).unwrap();
        assert!(
            text.to_ascii_lowercase().contains("transfer-encoding: chunked"),
            "{}",
            text
        );
        assert!(text.contains("4\r\nping\r\n"), "{}", text);
        assert!(text.contains("4\r\npong\r\n"), "{}", text);

        stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n")
            .await
            .unwrap();
        stream.flush().await.unwrap();
    });

    let source: BodySource = Arc::new(|| {
        Box::pin(futures_util::stream::iter(vec![
            Ok(bytes::Bytes::from_static(b"ping")),
            Ok(bytes::Bytes::from_static(b"pong")),
        ]))
    });

    let client = Client::new();
    let response = client
        .request(uri, move |spec| {
            spec.method(brook::Method::POST)
                .body_stream_unknown(source.clone());
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    server.await.unwrap();
}

#[tokio::test]
async fn short_known_length_body_fails() {
    let (listener, uri, _) = listener().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        // Read whatever arrives until the client gives up and closes.
        let mut sink = Vec::new();
        let _ = stream.read_to_end(&mut sink).await;
    });

    let source: BodySource = Arc::new(|| {
        Box::pin(futures_util::stream::iter(vec![Ok(
            bytes::Bytes::from_static(b"only four"),
        )]))
    });

    let client = Client::new();
    let err = client
        .request(uri, move |spec| {
            spec.method(brook::Method::POST)
                .body_stream(source.clone(), 100);
            Ok(())
        })
        .await
        .unwrap_err();
    assert!(err.is_incomplete_body(), "{:?}", err);
    server.await.unwrap();
}

#[tokio::test]
async fn expect_continue_defers_body() {
    let (listener, uri, _) = listener().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        // Read only the head first; the body must not have been sent yet.
        let mut buf = Vec::new();
        while find_head_end(&buf).is_none() {
            let mut chunk = [0u8; 4096];
            let n = stream.read(&mut chunk).await.unwrap();
            buf.extend_from_slice(&chunk[..n]);
        }
        let head_end = find_head_end(&buf).unwrap();
        assert_eq!(buf.len(), head_end, "body sent before 100 Continue");

        stream.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await.unwrap();
        stream.flush().await.unwrap();

        let mut body = vec![0u8; 4];
        stream.read_exact(&mut body).await.unwrap();
        assert_eq!(&body, b"ping");

        stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n")
            .await
            .unwrap();
        stream.flush().await.unwrap();
    });

    let client = Client::new();
    let response = client
        .request(uri, |spec| {
            spec.method(brook::Method::POST)
                .header(
                    brook::header::EXPECT,
                    brook::http::HeaderValue::from_static("100-continue"),
                )
                .body_bytes(&b"ping"[..]);
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    server.await.unwrap();
}

#[tokio::test]
async fn gzip_response_is_decoded() {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write as _;

    let body = b"a body worth compressing, a body worth compressing";
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body).unwrap();
    let compressed = encoder.finish().unwrap();

    let (listener, uri, _) = listener().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_request(&mut stream).await.unwrap();
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\nContent-Length: {}\r\n\r\n",
            compressed.len()
        );
        stream.write_all(head.as_bytes()).await.unwrap();
        stream.write_all(&compressed).await.unwrap();
        stream.flush().await.unwrap();
    });

    let client = Client::new();
    let response = client.get(uri).await.unwrap();
    assert_eq!(&response.body()[..], body);
    // The coding and wire length are gone from the exposed head.
    assert!(response.headers().get("content-encoding").is_none());
    assert!(response.headers().get("content-length").is_none());
    server.await.unwrap();
}

#[tokio::test]
async fn max_content_length_bounds_aggregation() {
    let (listener, uri, _) = listener().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_request(&mut stream).await.unwrap();
        stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\n0123456789")
            .await
            .unwrap();
        stream.flush().await.unwrap();
    });

    let client = Client::new();
    let err = client
        .request(uri, |spec| {
            spec.max_content_length(4u64);
            Ok(())
        })
        .await
        .unwrap_err();
    assert!(err.is_max_content_length(), "{:?}", err);
    server.await.unwrap();
}

#[tokio::test]
async fn noncanonical_reason_phrase_is_kept() {
    let (listener, uri, _) = listener().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_request(&mut stream).await.unwrap();
        stream
            .write_all(b"HTTP/1.1 200 Splendid\r\nContent-Length: 0\r\n\r\n")
            .await
            .unwrap();
        stream.flush().await.unwrap();
    });

    let client = Client::new();
    let response = client.get(uri).await.unwrap();
    let reason = response.extensions().get::<brook::ext::ReasonPhrase>().unwrap();
    assert_eq!(reason.as_bytes(), b"Splendid");
    server.await.unwrap();
}
