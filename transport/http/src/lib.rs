/*!
Submit GAMEhud analytics events over HTTP.

This crate implements [`gamehud::Transport`] on top of `hyper`, posting
each submission's fields as a form-urlencoded body to
`{base_url}/{endpoint}`. Connection failures and request errors map to
[`gamehud::SubmitOutcome::Unreachable`], non-2xx responses to
[`gamehud::SubmitOutcome::Rejected`]; the SDK treats both as "try again
next cycle", so nothing here ever panics or surfaces errors to the host.

# Getting started

```no_run
fn main() {
    let hud = gamehud::setup()
        .api_key("your-api-key")
        .spawn(
            gamehud_http::transport("https://www.mygamehud.com/api/v2")
                .build()
                .unwrap(),
        );

    hud.event("game started");
}
```

`https` endpoints need the `tls` Cargo feature, which is on by default and
verifies against the platform's native roots.
*/

use std::{
    collections::BTreeMap,
    fmt,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex},
    task::{self, Context, Poll},
};

use bytes::Bytes;
use gamehud::{Metric, SubmitOutcome, Submission, Transport};
use hyper::{
    body::{self, Body, Frame, SizeHint},
    client::conn::http1,
    Method, Request, Uri,
};

use crate::internal_metrics::InternalMetrics;

mod internal_metrics;

/**
An error attempting to build an [`HttpTransport`].

Runtime failures never surface this way; they become
[`SubmitOutcome::Unreachable`] or [`SubmitOutcome::Rejected`].
*/
pub struct Error(Box<dyn std::error::Error + Send + Sync>);

impl Error {
    fn new(msg: impl fmt::Display, err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Error(format!("{msg}: {err}").into())
    }

    fn msg(msg: impl fmt::Display) -> Self {
        Error(msg.to_string().into())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

/**
Create a builder for an [`HttpTransport`] posting to `base_url`.
*/
pub fn transport(base_url: impl AsRef<str>) -> TransportBuilder {
    TransportBuilder {
        base_url: base_url.as_ref().to_owned(),
        headers: Vec::new(),
    }
}

/**
A builder for an [`HttpTransport`].
*/
pub struct TransportBuilder {
    base_url: String,
    headers: Vec<(String, String)>,
}

impl TransportBuilder {
    /**
    Extra headers to attach to every request.
    */
    pub fn headers(mut self, headers: impl Into<Vec<(String, String)>>) -> Self {
        self.headers = headers.into();
        self
    }

    pub fn build(self) -> Result<HttpTransport, Error> {
        Ok(HttpTransport {
            base: BaseUrl::parse(&self.base_url)?,
            headers: self.headers,
            metrics: Arc::new(InternalMetrics::default()),
            sender: Mutex::new(None),
        })
    }
}

struct BaseUrl {
    https: bool,
    host: String,
    port: u16,
    authority: String,
    // Never ends with a separator; endpoint names are appended to it
    path: String,
}

impl BaseUrl {
    fn parse(url: &str) -> Result<Self, Error> {
        let uri: Uri = url
            .parse()
            .map_err(|e| Error::new(format_args!("failed to parse {url}"), e))?;

        let https = match uri.scheme_str() {
            Some("http") => false,
            Some("https") => true,
            _ => return Err(Error::msg(format_args!("{url} must be an http(s) url"))),
        };

        let host = uri
            .host()
            .ok_or_else(|| Error::msg(format_args!("{url} is missing a host")))?
            .to_owned();

        let authority = match uri.authority() {
            Some(authority) => authority.as_str().to_owned(),
            None => host.clone(),
        };

        Ok(BaseUrl {
            https,
            port: uri.port_u16().unwrap_or(if https { 443 } else { 80 }),
            authority,
            path: uri.path().trim_end_matches('/').to_owned(),
            host,
        })
    }
}

/**
A [`gamehud::Transport`] over HTTP/1.1.

Connections are kept alive and reused between submissions; a connection
that fails is dropped and the next submission dials a fresh one.
*/
pub struct HttpTransport {
    base: BaseUrl,
    headers: Vec<(String, String)>,
    metrics: Arc<InternalMetrics>,
    sender: Mutex<Option<http1::SendRequest<FormBody>>>,
}

impl Transport for HttpTransport {
    fn submit(
        &self,
        submission: Submission,
    ) -> Pin<Box<dyn Future<Output = SubmitOutcome> + Send + '_>> {
        Box::pin(async move {
            match self.send(submission).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    log::debug!("GAMEhud transport failure: {err}");

                    SubmitOutcome::Unreachable
                }
            }
        })
    }
}

impl HttpTransport {
    /**
    Sample counters describing the transport's own activity.
    */
    pub fn sample_metrics(&self) -> impl Iterator<Item = Metric> + 'static {
        self.metrics.sample()
    }

    async fn send(&self, submission: Submission) -> Result<SubmitOutcome, Error> {
        let mut sender = match self.poison() {
            Some(sender) => sender,
            None => self.connect().await?,
        };

        let body = FormBody::new(form_urlencode(&submission.fields));

        let mut req = Request::builder()
            .uri(format!("{}/{}", self.base.path, submission.endpoint))
            .method(Method::POST)
            .header("host", self.base.authority.as_str())
            .header("content-type", "application/x-www-form-urlencoded")
            .header("content-length", body.len());

        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }

        let req = req
            .body(body)
            .map_err(|e| Error::new("failed to build HTTP request", e))?;

        let res = sender.send_request(req).await.map_err(|e| {
            self.metrics.transport_request_failed.increment();

            Error::new("failed to send HTTP request", e)
        })?;

        self.metrics.transport_request_sent.increment();

        // The connection survived the request; put it back for reuse
        self.unpoison(sender);

        let status = res.status().as_u16();
        let body = String::from_utf8_lossy(&read_body(res).await?).into_owned();

        if (200..300).contains(&status) {
            self.metrics.request_acknowledged.increment();

            Ok(SubmitOutcome::Acknowledged(body))
        } else {
            self.metrics.request_rejected.increment();

            Ok(SubmitOutcome::Rejected(body))
        }
    }

    fn poison(&self) -> Option<http1::SendRequest<FormBody>> {
        self.sender.lock().unwrap().take()
    }

    fn unpoison(&self, sender: http1::SendRequest<FormBody>) {
        *self.sender.lock().unwrap() = Some(sender);
    }

    async fn connect(&self) -> Result<http1::SendRequest<FormBody>, Error> {
        let io = tokio::net::TcpStream::connect((&*self.base.host, self.base.port))
            .await
            .map_err(|e| {
                self.metrics.transport_conn_failed.increment();

                Error::new("failed to connect TCP stream", e)
            })?;

        self.metrics.transport_conn_established.increment();

        if self.base.https {
            #[cfg(feature = "tls")]
            {
                let io = self.tls_handshake(io).await?;

                self.http1_handshake(io).await
            }
            #[cfg(not(feature = "tls"))]
            {
                Err(Error::msg("https support requires the `tls` Cargo feature"))
            }
        } else {
            self.http1_handshake(io).await
        }
    }

    #[cfg(feature = "tls")]
    async fn tls_handshake(
        &self,
        io: tokio::net::TcpStream,
    ) -> Result<tokio_rustls::client::TlsStream<tokio::net::TcpStream>, Error> {
        use tokio_rustls::{rustls, TlsConnector};

        let domain = self.base.host.clone().try_into().map_err(|e| {
            self.metrics.transport_conn_tls_failed.increment();

            Error::new(
                format_args!("could not extract a DNS name from {}", self.base.host),
                e,
            )
        })?;

        let tls = {
            let mut root_store = rustls::RootCertStore::empty();

            for cert in rustls_native_certs::load_native_certs().map_err(|e| {
                self.metrics.transport_conn_tls_failed.increment();

                Error::new("failed to load native certificates", e)
            })? {
                let _ = root_store.add(cert);
            }

            Arc::new(
                rustls::ClientConfig::builder()
                    .with_root_certificates(root_store)
                    .with_no_client_auth(),
            )
        };

        let conn = TlsConnector::from(tls);

        let io = conn.connect(domain, io).await.map_err(|e| {
            self.metrics.transport_conn_tls_failed.increment();

            Error::new("failed to connect TLS stream", e)
        })?;

        self.metrics.transport_conn_tls_handshake.increment();

        Ok(io)
    }

    async fn http1_handshake(
        &self,
        io: impl tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Sync + Unpin + 'static,
    ) -> Result<http1::SendRequest<FormBody>, Error> {
        let (sender, conn) = http1::handshake(HttpIo(io)).await.map_err(|e| {
            self.metrics.transport_conn_failed.increment();

            Error::new("failed to perform HTTP1 handshake", e)
        })?;

        tokio::task::spawn(async move {
            let _ = conn.await;
        });

        Ok(sender)
    }
}

fn form_urlencode(fields: &BTreeMap<String, String>) -> String {
    let mut encoded = String::new();

    for (key, value) in fields {
        if !encoded.is_empty() {
            encoded.push('&');
        }

        push_urlencoded(&mut encoded, key);
        encoded.push('=');
        push_urlencoded(&mut encoded, value);
    }

    encoded
}

fn push_urlencoded(out: &mut String, raw: &str) {
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b' ' => out.push('+'),
            _ => {
                out.push('%');
                out.push_str(&format!("{byte:02X}"));
            }
        }
    }
}

async fn read_body(mut res: hyper::Response<body::Incoming>) -> Result<Vec<u8>, Error> {
    struct BufNext<'a>(&'a mut body::Incoming, &'a mut Vec<u8>);

    impl<'a> Future for BufNext<'a> {
        type Output = Result<bool, Error>;

        fn poll(self: Pin<&mut Self>, ctx: &mut task::Context<'_>) -> Poll<Self::Output> {
            // SAFETY: `self` does not use interior pinning
            let BufNext(incoming, read) = unsafe { Pin::get_unchecked_mut(self) };

            match Pin::new(incoming).poll_frame(ctx) {
                Poll::Ready(Some(Ok(frame))) => {
                    if let Some(frame) = frame.data_ref() {
                        read.extend_from_slice(frame);
                    }

                    Poll::Ready(Ok(true))
                }
                Poll::Ready(None) => Poll::Ready(Ok(false)),
                Poll::Ready(Some(Err(e))) => {
                    Poll::Ready(Err(Error::new("failed to read HTTP response body", e)))
                }
                Poll::Pending => Poll::Pending,
            }
        }
    }

    let mut read = Vec::new();
    let frame = res.body_mut();

    while BufNext(frame, &mut read).await? {}

    Ok(read)
}

struct FormBody {
    payload: Option<Bytes>,
}

impl FormBody {
    fn new(form: String) -> Self {
        FormBody {
            payload: Some(Bytes::from(form)),
        }
    }

    fn len(&self) -> usize {
        self.payload.as_ref().map(|payload| payload.len()).unwrap_or(0)
    }
}

impl Body for FormBody {
    type Data = Bytes;

    type Error = std::convert::Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        _: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let unpinned = self.get_mut();

        match unpinned.payload.take() {
            Some(payload) => Poll::Ready(Some(Ok(Frame::data(payload)))),
            None => Poll::Ready(None),
        }
    }

    fn is_end_stream(&self) -> bool {
        self.payload.is_none()
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.len() as u64)
    }
}

struct HttpIo<T>(T);

impl<T: tokio::io::AsyncRead> hyper::rt::Read for HttpIo<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        mut buf: hyper::rt::ReadBufCursor<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        // SAFETY: `io` inherits the pinning requirements of `self`
        let io = unsafe { self.map_unchecked_mut(|io| &mut io.0) };

        // SAFETY: `io` does not uninitialize any bytes
        let mut read_buf = tokio::io::ReadBuf::uninit(unsafe { buf.as_mut() });

        match tokio::io::AsyncRead::poll_read(io, cx, &mut read_buf) {
            Poll::Ready(Ok(())) => {
                let read = read_buf.filled().len();

                // SAFETY: The bytes being advanced have been initialized by `read_buf`
                unsafe { buf.advance(read) };

                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T: tokio::io::AsyncWrite> hyper::rt::Write for HttpIo<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, std::io::Error>> {
        // SAFETY: `io` inherits the pinning requirements of `self`
        let io = unsafe { self.map_unchecked_mut(|io| &mut io.0) };

        tokio::io::AsyncWrite::poll_write(io, cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), std::io::Error>> {
        // SAFETY: `io` inherits the pinning requirements of `self`
        let io = unsafe { self.map_unchecked_mut(|io| &mut io.0) };

        tokio::io::AsyncWrite::poll_flush(io, cx)
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        // SAFETY: `io` inherits the pinning requirements of `self`
        let io = unsafe { self.map_unchecked_mut(|io| &mut io.0) };

        tokio::io::AsyncWrite::poll_shutdown(io, cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::{
        io::{Read, Write},
        net::TcpListener,
        thread,
    };

    #[test]
    fn form_encoding_escapes_reserved_characters() {
        let fields = BTreeMap::from_iter([
            ("gh_name".to_owned(), "Player died".to_owned()),
            ("rank".to_owned(), "01 - Ensign & co?".to_owned()),
        ]);

        assert_eq!(
            "gh_name=Player+died&rank=01+-+Ensign+%26+co%3F",
            form_urlencode(&fields)
        );
    }

    #[test]
    fn base_urls_get_default_ports() {
        let base = BaseUrl::parse("http://localhost/api/v2/").unwrap();

        assert_eq!(80, base.port);
        assert_eq!("/api/v2", base.path);
        assert!(!base.https);

        let base = BaseUrl::parse("https://www.mygamehud.com/api/v2").unwrap();

        assert_eq!(443, base.port);
        assert!(base.https);
    }

    #[test]
    fn non_http_urls_are_rejected() {
        assert!(BaseUrl::parse("ftp://example.com").is_err());
        assert!(BaseUrl::parse("/just/a/path").is_err());
    }

    // A single-request HTTP server that captures what it was sent
    fn serve_once(status_line: &'static str, body: &'static str) -> (u16, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();

            let mut received = Vec::new();
            let mut buf = [0; 1024];

            // Read headers, then exactly content-length bytes of body
            let body_len = loop {
                let read = stream.read(&mut buf).unwrap();
                received.extend_from_slice(&buf[..read]);

                let text = String::from_utf8_lossy(&received);

                if let Some(headers_end) = text.find("\r\n\r\n") {
                    let content_length = text
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;

                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())?
                        })
                        .unwrap_or(0);

                    break headers_end + 4 + content_length;
                }
            };

            while received.len() < body_len {
                let read = stream.read(&mut buf).unwrap();
                received.extend_from_slice(&buf[..read]);
            }

            stream
                .write_all(
                    format!(
                        "{status_line}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                        body.len()
                    )
                    .as_bytes(),
                )
                .unwrap();

            String::from_utf8_lossy(&received).into_owned()
        });

        (port, handle)
    }

    fn submission() -> Submission {
        Submission {
            endpoint: gamehud::transport::endpoint::EVENTS,
            fields: BTreeMap::from_iter([("gh_api_key".to_owned(), "key-1".to_owned())]),
        }
    }

    #[tokio::test]
    async fn successful_responses_acknowledge() {
        let (port, server) = serve_once("HTTP/1.1 200 OK", "0");

        let transport = transport(format!("http://127.0.0.1:{port}/api/v2"))
            .build()
            .unwrap();

        match transport.submit(submission()).await {
            SubmitOutcome::Acknowledged(body) => assert_eq!("0", body),
            other => panic!("unexpected outcome {other:?}"),
        }

        let received = server.join().unwrap();

        assert!(received.starts_with("POST /api/v2/events HTTP/1.1\r\n"));
        assert!(received.contains("content-type: application/x-www-form-urlencoded"));
        assert!(received.ends_with("gh_api_key=key-1"));
    }

    #[tokio::test]
    async fn failed_statuses_reject_with_the_body() {
        let (port, server) = serve_once("HTTP/1.1 422 Unprocessable Entity", "unknown api key");

        let transport = transport(format!("http://127.0.0.1:{port}"))
            .build()
            .unwrap();

        match transport.submit(submission()).await {
            SubmitOutcome::Rejected(body) => assert_eq!("unknown api key", body),
            other => panic!("unexpected outcome {other:?}"),
        }

        server.join().unwrap();
    }

    #[tokio::test]
    async fn refused_connections_are_unreachable() {
        // Bind a port and drop it so nothing is listening there
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();

            listener.local_addr().unwrap().port()
        };

        let transport = transport(format!("http://127.0.0.1:{port}"))
            .build()
            .unwrap();

        assert!(matches!(
            transport.submit(submission()).await,
            SubmitOutcome::Unreachable
        ));
    }
}
