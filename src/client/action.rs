use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{
    HeaderValue, ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, EXPECT, HOST, LOCATION,
    TRANSFER_ENCODING,
};
use http::{Method, Response, StatusCode, Uri};
use tokio::time::timeout;

use crate::body::{BodyStream, Content, StreamedBody, TakenContent};
use crate::proto::h1::encode;
use crate::proto::{BodyLength, Conn, ResponseHead};

use super::config::{Configure, RequestConfig, RequestSpec};
use super::connect::{Destination, Scheme, TlsParams};
use super::decompress::{Coding, Inflater};
use super::pool::PoolKey;
use super::redirect::{self, Replay};
use super::Shared;

/// Runs one `execute()`: every wire attempt of a request, across redirects,
/// until a response is published or an error surfaces.
///
/// Each hop builds a fresh immutable config by re-running the (possibly
/// composed) configurator, so replayed bodies restart from their source. A
/// hop's connection is fully disposed of before its successor dials.
pub(crate) async fn execute(
    shared: &Shared,
    uri: Uri,
    configure: Configure,
) -> crate::Result<Response<StreamedBody>> {
    let mut uri = uri;
    let mut configure = configure;
    let mut hops = 0u32;

    loop {
        let mut config = RequestConfig::build(uri.clone(), &shared.defaults, &configure)?;
        let (mut conn, head, key) = attempt(shared, &mut config).await?;

        if redirect::is_redirect(head.status)
            && config.max_redirects > 0
            && hops < config.max_redirects
        {
            if let Some((next_uri, next_configure)) =
                next_hop(&head, &config, &uri, &configure)?
            {
                debug!("following {} redirect to {}", head.status, next_uri);
                // The redirect body is never surfaced: drain it, then give
                // the transport back (or close it) before the next attempt.
                let drained = conn.drain_body().await;
                if drained.is_ok() && conn.is_reusable() {
                    shared.pool.checkin(key, conn.into_io());
                } else {
                    drop(conn);
                }

                hops += 1;
                uri = next_uri;
                configure = next_configure;
                continue;
            }
        }

        return Ok(publish(conn, head, key, &config, shared));
    }
}

/// One wire exchange: checkout/dial, write head and body, read the
/// response head.
async fn attempt(
    shared: &Shared,
    config: &mut RequestConfig,
) -> crate::Result<(Conn, ResponseHead, PoolKey)> {
    let (key, dst) = target(config)?;

    let transport = match shared.pool.checkout(&key) {
        Some(idle) => idle,
        None => match timeout(config.connect_timeout, shared.connector.connect(&dst)).await {
            Ok(connected) => connected?,
            Err(_elapsed) => return Err(crate::Error::new_connect_timeout()),
        },
    };
    let mut conn = Conn::new(
        transport,
        config.read_timeout,
        config.response_max_chunk_size,
    );

    let headers = prepare_headers(config)?;
    let head_bytes = encode::request_head(&config.method, request_target(&config.uri), &headers);
    conn.write_all(&head_bytes)
        .await
        .map_err(crate::Error::new_io)?;
    conn.flush().await.map_err(crate::Error::new_io)?;

    let expects_continue = !config.content.is_empty()
        && headers.get(EXPECT).is_some_and(|v| {
            v.to_str()
                .is_ok_and(|s| s.eq_ignore_ascii_case("100-continue"))
        });

    let mut early_head = None;
    if expects_continue {
        match await_continue(&mut conn, &config.method, config.read_timeout).await? {
            ContinueResult::Continue => {}
            ContinueResult::Final(head) => {
                debug!("final response instead of 100-continue; skipping body");
                // The peer never saw the body this connection promised.
                conn.mark_not_reusable();
                early_head = Some(head);
            }
            ContinueResult::TimedOut => {
                trace!("continue window lapsed; sending body anyway");
                conn.reset_read_timer();
            }
        }
    }

    if early_head.is_none() && !config.content.is_empty() {
        write_body(&mut conn, config.content.take()).await?;
        conn.flush().await.map_err(crate::Error::new_io)?;
    }

    let head = match early_head {
        Some(head) => head,
        None => conn.read_head(&config.method, true).await?,
    };
    Ok((conn, head, key))
}

fn target(config: &RequestConfig) -> crate::Result<(PoolKey, Destination)> {
    let scheme = match config.uri.scheme_str() {
        Some("http") => Scheme::Http,
        Some("https") => Scheme::Https,
        Some(_) => {
            return Err(crate::Error::new_user_config(
                "request uri scheme must be http or https",
            ))
        }
        None => {
            return Err(crate::Error::new_user_config(
                "request uri must be absolute",
            ))
        }
    };
    let host = config
        .uri
        .host()
        .ok_or_else(|| crate::Error::new_user_config("request uri must include a host"))?
        .to_owned();
    let port = config.uri.port_u16().unwrap_or(match scheme {
        Scheme::Http => 80,
        Scheme::Https => 443,
    });

    let key = PoolKey {
        scheme,
        host: host.clone(),
        port,
        tls_identity: config.tls.as_ref().map(|tls| tls.identity()),
    };

    let mut tls_params = TlsParams::default();
    tls_params.set_server_name(&host);
    if let Some(ref customize) = config.tls_params {
        customize(&mut tls_params);
    }
    let dst = Destination::new(scheme, host, port, config.tls.clone(), tls_params);

    Ok((key, dst))
}

fn request_target(uri: &Uri) -> &str {
    uri.path_and_query().map_or("/", |pq| pq.as_str())
}

/// Finalizes the header set for the wire: Host, Accept-Encoding, and the
/// framing headers chosen by the body content.
fn prepare_headers(config: &mut RequestConfig) -> crate::Result<http::HeaderMap> {
    let mut headers = std::mem::take(&mut config.headers);

    if !headers.contains_key(HOST) {
        let host = config.uri.host().unwrap_or_default();
        let value = match (config.uri.port_u16(), config.uri.scheme_str()) {
            (None, _) => HeaderValue::from_str(host),
            (Some(80), Some("http")) | (Some(443), Some("https")) => HeaderValue::from_str(host),
            (Some(port), _) => HeaderValue::from_str(&format!("{}:{}", host, port)),
        }
        .map_err(|_| crate::Error::new_user_config("request uri host is not a valid header"))?;
        headers.insert(HOST, value);
    }

    if config.decompress_response && !headers.contains_key(ACCEPT_ENCODING) {
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate"));
    }

    // Framing follows the content, not whatever the caller left behind.
    headers.remove(CONTENT_LENGTH);
    headers.remove(TRANSFER_ENCODING);
    match body_length(&config.method, &config.content) {
        Some(BodyLength::Known(len)) => {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
        }
        Some(BodyLength::Unknown) => {
            headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        }
        None => {}
    }

    Ok(headers)
}

fn body_length(method: &Method, content: &Content) -> Option<BodyLength> {
    match content.len() {
        Some(0) => {
            // Methods without conventional bodies skip `Content-Length: 0`.
            if method == Method::GET
                || method == Method::HEAD
                || method == Method::DELETE
                || method == Method::OPTIONS
                || method == Method::TRACE
                || method == Method::CONNECT
            {
                None
            } else {
                Some(BodyLength::Known(0))
            }
        }
        Some(len) => Some(BodyLength::Known(len)),
        None => Some(BodyLength::Unknown),
    }
}

enum ContinueResult {
    Continue,
    Final(ResponseHead),
    TimedOut,
}

/// Waits for a `100 Continue` (or a final response) for at most `window`.
async fn await_continue(
    conn: &mut Conn,
    method: &Method,
    window: Duration,
) -> crate::Result<ContinueResult> {
    let wait = async {
        loop {
            let head = conn.read_head(method, false).await?;
            if head.status == StatusCode::CONTINUE {
                return Ok(ContinueResult::Continue);
            }
            if head.status.is_informational() {
                continue;
            }
            return Ok(ContinueResult::Final(head));
        }
    };
    match timeout(window, wait).await {
        Ok(result) => result,
        Err(_elapsed) => Ok(ContinueResult::TimedOut),
    }
}

async fn write_body(conn: &mut Conn, content: TakenContent) -> crate::Result<()> {
    match content {
        TakenContent::Empty => Ok(()),
        TakenContent::Buffer(bytes) => {
            // One write; returning releases the buffer handle.
            conn.write_all(&bytes)
                .await
                .map_err(crate::Error::new_body_write)
        }
        TakenContent::Stream {
            mut stream,
            length: Some(total),
        } => {
            let mut remaining = total;
            while remaining > 0 {
                match next_chunk(&mut stream).await {
                    Some(Ok(chunk)) => {
                        if chunk.is_empty() {
                            continue;
                        }
                        if chunk.len() as u64 > remaining {
                            debug!("request body past declared length; truncating");
                        }
                        let take = u64::min(chunk.len() as u64, remaining) as usize;
                        conn.write_all(&chunk[..take])
                            .await
                            .map_err(crate::Error::new_body_write)?;
                        remaining -= take as u64;
                    }
                    Some(Err(err)) => return Err(crate::Error::new_user_body(err)),
                    None => {
                        // Short of the declared length; the connection is
                        // unusable since the peer still expects bytes.
                        conn.mark_not_reusable();
                        return Err(crate::Error::new_incomplete_body());
                    }
                }
            }
            Ok(())
        }
        TakenContent::Stream {
            mut stream,
            length: None,
        } => loop {
            match next_chunk(&mut stream).await {
                Some(Ok(chunk)) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    conn.write_all(&encode::chunk_size(chunk.len()))
                        .await
                        .map_err(crate::Error::new_body_write)?;
                    conn.write_all(&chunk)
                        .await
                        .map_err(crate::Error::new_body_write)?;
                    conn.write_all(encode::CRLF)
                        .await
                        .map_err(crate::Error::new_body_write)?;
                }
                Some(Err(err)) => return Err(crate::Error::new_user_body(err)),
                None => {
                    return conn
                        .write_all(encode::CHUNKED_END)
                        .await
                        .map_err(crate::Error::new_body_write)
                }
            }
        },
    }
}

async fn next_chunk(stream: &mut BodyStream) -> Option<crate::Result<Bytes>> {
    std::future::poll_fn(|cx| stream.as_mut().poll_next(cx)).await
}

/// Evaluates one redirect: resolves the location, consults the caller's
/// decision function, and applies the method/body replay policy.
///
/// `Ok(None)` means the response should be surfaced instead of followed.
fn next_hop(
    head: &ResponseHead,
    config: &RequestConfig,
    uri: &Uri,
    configure: &Configure,
) -> crate::Result<Option<(Uri, Configure)>> {
    let location = head
        .headers
        .get(LOCATION)
        .ok_or_else(|| crate::Error::new_bad_redirect("missing location header"))?
        .to_str()
        .map_err(|_| crate::Error::new_bad_redirect("location header is not a string"))?;
    let next_uri = redirect::resolve_location(uri, location)?;

    let mut next_configure = configure.clone();
    if let Some(ref decide) = config.on_redirect {
        match decide(&response_parts(head)) {
            Some(extra) => next_configure = compose(next_configure, extra),
            None => {
                trace!("redirect decision function declined; surfacing response");
                return Ok(None);
            }
        }
    }

    if redirect::replay_policy(head.status, &config.method) == Replay::ForceGet {
        next_configure = compose(
            next_configure,
            Arc::new(|spec: &mut RequestSpec| {
                spec.method(Method::GET);
                spec.body(Content::empty());
                Ok(())
            }),
        );
    }

    Ok(Some((next_uri, next_configure)))
}

fn compose(first: Configure, second: Configure) -> Configure {
    Arc::new(move |spec: &mut RequestSpec| {
        first(spec)?;
        second(spec)
    })
}

fn response_parts(head: &ResponseHead) -> http::response::Parts {
    let (mut parts, ()) = Response::new(()).into_parts();
    parts.status = head.status;
    parts.version = head.version;
    parts.headers = head.headers.clone();
    if let Some(ref reason) = head.reason {
        parts.extensions.insert(reason.clone());
    }
    parts
}

/// Builds the surfaced response; connection ownership moves into the body.
fn publish(
    conn: Conn,
    head: ResponseHead,
    key: PoolKey,
    config: &RequestConfig,
    shared: &Shared,
) -> Response<StreamedBody> {
    let ResponseHead {
        version,
        status,
        reason,
        mut headers,
    } = head;

    // Informational and no-content responses must not advertise a length.
    if status.is_informational() || status == StatusCode::NO_CONTENT {
        headers.remove(CONTENT_LENGTH);
    }

    let inflate = if config.decompress_response {
        headers
            .get(CONTENT_ENCODING)
            .and_then(Coding::recognize)
            .map(Inflater::new)
    } else {
        None
    };
    if inflate.is_some() {
        // The caller sees decoded bytes; the wire coding and length are no
        // longer true of the body.
        headers.remove(CONTENT_ENCODING);
        headers.remove(CONTENT_LENGTH);
    }

    let body = StreamedBody::new(
        conn,
        shared.pool.clone(),
        key,
        inflate,
        config.max_content_length,
    );

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.version_mut() = version;
    *response.headers_mut() = headers;
    if let Some(reason) = reason {
        response.extensions_mut().insert(reason);
    }
    response
}
