// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

//! The lifecycle of a single connection: reading requests, dispatching them
//! to the handler and writing the responses, for as long as the connection
//! persists.

use std::{
    borrow::Cow,
    io::{self, Cursor},
    time::SystemTime,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, BufReader},
    sync::watch,
    time::timeout,
};
use tracing::{debug, error, trace};

use piuma_http::{
    parse_error_of,
    BodyKind,
    Error,
    HeaderField,
    Headers,
    HttpParseError,
    HttpVersion,
    Method,
    ParameterParser,
    Response,
    Separator,
    StatusCode,
};

use crate::{
    body::{is_body_stall, BodyStalled},
    body_framing,
    read_request_head,
    responses,
    write::gzip_bytes,
    BodyFraming,
    BoundedInput,
    ByteSource,
    OutputWrapper,
    Request,
    ServerConfig,
    Settings,
};

/// Bodies of at most this length aren't worth compressing.
const GZIP_MINIMUM_LENGTH: u64 = 512;

/// Bodies shorter than this are compressed in memory, and sent with a
/// `Content-Length`.
const GZIP_BUFFERED_THRESHOLD: u64 = 8192;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    AwaitingRequest,
    ParsingRequest,
    Dispatching,
    WritingResponse,
    Closing,
    Closed,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    RequestStarted,
    HeadParsed,
    MalformedRequest,
    HandlerFinished,
    ResponseWritten { persistent: bool },
    PeerClosed,
    TimedOut,
    ShutdownRequested,
    TransportFailed,
    Released,
}

impl SessionState {
    #[must_use]
    pub fn on(self, event: SessionEvent) -> SessionState {
        use SessionEvent as Event;
        use SessionState as State;

        match (self, event) {
            (_, Event::TransportFailed) => State::Closed,
            (State::Closed, _) => State::Closed,

            (State::AwaitingRequest, Event::RequestStarted) => State::ParsingRequest,

            (State::ParsingRequest, Event::HeadParsed) => State::Dispatching,
            (State::ParsingRequest, Event::MalformedRequest | Event::TimedOut) => State::WritingResponse,

            (State::Dispatching, Event::HandlerFinished | Event::MalformedRequest | Event::TimedOut) => State::WritingResponse,

            (State::WritingResponse, Event::ResponseWritten { persistent: true }) => State::AwaitingRequest,

            (State::Closing, Event::Released) => State::Closed,

            _ => State::Closing,
        }
    }

    fn apply(&mut self, event: SessionEvent) {
        let next = self.on(event);
        trace!(from = ?self, ?event, to = ?next, "session transition");
        *self = next;
    }
}

enum Arrival {
    Request,
    PeerClosed,
    TimedOut,
    ShuttingDown,
}

/// What the response writer needs to know about the request.
#[derive(Debug)]
struct Exchange {
    version: HttpVersion,
    head_request: bool,
    accepts_gzip: bool,
}

impl Default for Exchange {
    fn default() -> Self {
        Self {
            version: HttpVersion::Http11,
            head_request: false,
            accepts_gzip: false,
        }
    }
}

/// How the body of a response is put on the wire.
enum Transfer {
    None,
    Bytes(Cow<'static, [u8]>),
    Sized {
        source: Box<dyn AsyncRead + Send + Unpin>,
        length: u64,
    },
    Chunked(Box<dyn AsyncRead + Send + Unpin>),
    GzipChunked(Box<dyn AsyncRead + Send + Unpin>),

    /// The end of the body is signalled by closing the connection.
    CloseDelimited(Box<dyn AsyncRead + Send + Unpin>),
}

pub struct Session<'c, R, W> {
    reader: R,
    output: OutputWrapper<W>,
    config: &'c ServerConfig,
    shutdown: Option<watch::Receiver<bool>>,
    state: SessionState,
}

impl<'c, R, W> Session<'c, R, W>
        where R: ByteSource,
              W: AsyncWrite + Send + Unpin {
    pub fn new(reader: R, writer: W, config: &'c ServerConfig) -> Self {
        Self {
            reader,
            output: OutputWrapper::new(writer, config.settings.output_buffer_size)
                .with_stall_timeout(config.settings.write_timeout),
            config,
            shutdown: None,
            state: SessionState::AwaitingRequest,
        }
    }

    /// Closes the session when it is waiting for a request and the value
    /// becomes `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Serves requests until the connection no longer persists.
    pub async fn run(mut self) {
        while self.state == SessionState::AwaitingRequest {
            if let Err(error) = self.exchange().await {
                debug!(%error, "connection failed");
                self.state.apply(SessionEvent::TransportFailed);
            }
        }

        let Session { output, mut state, .. } = self;
        if state == SessionState::Closing {
            if let Err(error) = output.close().await {
                debug!(%error, "failed to close connection");
            }
            state.apply(SessionEvent::Released);
        }
    }

    async fn exchange(&mut self) -> io::Result<()> {
        let config = self.config;
        let settings = &config.settings;

        match self.await_request().await? {
            Arrival::Request => self.state.apply(SessionEvent::RequestStarted),
            Arrival::PeerClosed => {
                self.state.apply(SessionEvent::PeerClosed);
                return Ok(());
            }
            Arrival::TimedOut => {
                trace!("idle connection timed out");
                self.state.apply(SessionEvent::TimedOut);
                return Ok(());
            }
            Arrival::ShuttingDown => {
                self.state.apply(SessionEvent::ShutdownRequested);
                return Ok(());
            }
        }

        let head = match timeout(settings.read_headers_timeout, read_request_head(&mut self.reader, settings)).await {
            Ok(Ok(Some(head))) => head,
            Ok(Ok(None)) => {
                self.state.apply(SessionEvent::PeerClosed);
                return Ok(());
            }
            Ok(Err(Error::ParseError(error))) => {
                debug!(%error, "malformed request head");
                self.state.apply(SessionEvent::MalformedRequest);
                return self.reject(responses::for_parse_error(error)).await;
            }
            Ok(Err(Error::Other(error))) => return Err(error),
            Ok(Err(Error::InvalidArgument(error))) => return Err(io::Error::new(io::ErrorKind::InvalidData, error)),
            Err(_) => {
                debug!("timed out reading the request head");
                self.state.apply(SessionEvent::TimedOut);
                return self.reject(responses::request_timeout()).await;
            }
        };
        self.state.apply(SessionEvent::HeadParsed);

        let framing = match body_framing(&head.headers) {
            Ok(framing) => framing,
            Err(error) => {
                debug!(%error, "invalid body framing");
                self.state.apply(SessionEvent::MalformedRequest);
                return self.reject(responses::for_parse_error(error)).await;
            }
        };

        if let Some(expectation) = head.headers.get_first(&HeaderField::EXPECT) {
            if !expectation.eq_ignore_ascii_case("100-continue") {
                debug!(expectation, "unsupported expectation");
                self.state.apply(SessionEvent::MalformedRequest);
                return self.reject(responses::expectation_failed()).await;
            }

            if framing != BodyFraming::Length(0) && head.version == HttpVersion::Http11 {
                self.write_continue().await?;
            }
        }

        let exchange = Exchange {
            version: head.version,
            head_request: head.method == Method::Head,
            accepts_gzip: accepts_gzip(&head.headers),
        };
        let client_wants_close = head.headers.contains_token(&HeaderField::CONNECTION, "close");

        let body = match framing {
            BodyFraming::Length(length) => BoundedInput::with_length(&mut self.reader, length),
            BodyFraming::Chunked => BoundedInput::chunked(&mut self.reader),
        };
        let body = body.with_stall_timeout(settings.read_body_timeout);
        let mut request = Request::new(head, body);

        let (response, mut persistent) = match config.handler.handle(&mut request).await {
            Ok(response) => {
                self.state.apply(SessionEvent::HandlerFinished);
                (response, true)
            }
            Err(error) if stalled_body(&error) => {
                debug!("timed out reading the request body");
                self.state.apply(SessionEvent::TimedOut);
                (responses::request_timeout(), false)
            }
            Err(error) => match framing_error_of(&error) {
                Some(parse_error) => {
                    debug!(error = %parse_error, "malformed request body");
                    self.state.apply(SessionEvent::MalformedRequest);
                    (responses::for_parse_error(parse_error), false)
                }
                None => {
                    error!(method = %request.method, request_target = %request.target, "handler failed: {error:#}");
                    self.state.apply(SessionEvent::HandlerFinished);
                    (responses::internal_server_error(), true)
                }
            },
        };

        persistent &= exchange.version.supports_persistent_connections()
            && !client_wants_close
            && !response.headers.contains_token(&HeaderField::CONNECTION, "close");

        if persistent && !request.body.is_finished() {
            persistent = match request.body.close().await {
                Ok(discarded) => {
                    trace!(discarded, "discarded unread request body");
                    true
                }
                Err(error) => {
                    debug!(%error, "failed to discard the request body");
                    false
                }
            };
        }
        drop(request);

        let persistent = write_response(&mut self.output, settings, response, &exchange, persistent).await?;
        self.state.apply(SessionEvent::ResponseWritten { persistent });
        Ok(())
    }

    /// Waits until the next request starts arriving.
    async fn await_request(&mut self) -> io::Result<Arrival> {
        let idle_timeout = self.config.settings.idle_timeout;
        let reader = &mut self.reader;
        let arrival = async move {
            match timeout(idle_timeout, reader.fill_buf()).await {
                Ok(Ok(available)) if available.is_empty() => Ok(Arrival::PeerClosed),
                Ok(Ok(_)) => Ok(Arrival::Request),
                Ok(Err(error)) => Err(error),
                Err(_) => Ok(Arrival::TimedOut),
            }
        };

        let Some(shutdown) = &mut self.shutdown else {
            return arrival.await;
        };

        if *shutdown.borrow_and_update() {
            return Ok(Arrival::ShuttingDown);
        }

        tokio::select! {
            arrival = arrival => arrival,
            _ = shutdown.changed() => Ok(Arrival::ShuttingDown),
        }
    }

    /// Sends the interim response allowing the client to send the body.
    ///
    /// ### References
    /// * [RFC 9110, Section 10.1.1. Expect](https://www.rfc-editor.org/rfc/rfc9110.html#name-expect)
    async fn write_continue(&mut self) -> io::Result<()> {
        self.output.write_status_line(StatusCode::Continue).await?;
        self.output.end_head().await?;
        self.output.flush().await
    }

    /// Writes an error response, after which the connection is closed.
    async fn reject(&mut self, response: Response) -> io::Result<()> {
        write_response(&mut self.output, &self.config.settings, response, &Exchange::default(), false).await?;
        self.state.apply(SessionEvent::ResponseWritten { persistent: false });
        Ok(())
    }
}

/// Whether the handler failed because the client stopped sending the body.
fn stalled_body(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| {
        cause.is::<BodyStalled>() || cause.downcast_ref::<io::Error>().is_some_and(is_body_stall)
    })
}

/// Finds the framing error that made the handler fail, if any.
fn framing_error_of(error: &anyhow::Error) -> Option<HttpParseError> {
    error.chain().find_map(|cause| {
        cause.downcast_ref::<HttpParseError>()
            .copied()
            .or_else(|| cause.downcast_ref::<io::Error>().and_then(parse_error_of))
    })
}

/// Whether the request accepts the `gzip` content coding with a non-zero
/// quality. An explicit `gzip` entry takes precedence over `*`.
///
/// ### References
/// * [RFC 9110, Section 12.5.3. Accept-Encoding](https://www.rfc-editor.org/rfc/rfc9110.html#name-accept-encoding)
fn accepts_gzip(headers: &Headers) -> bool {
    let Some(values) = headers.get(&HeaderField::ACCEPT_ENCODING) else {
        return false;
    };

    let mut gzip = None;
    let mut wildcard = None;
    for item in values.iter().flat_map(|value| value.split(',')) {
        let (coding, parameters) = item.split_once(';').unwrap_or((item, ""));
        let acceptable = ParameterParser::new(parameters, Separator::Semicolon)
            .find(|parameter| parameter.name.eq_ignore_ascii_case("q"))
            .and_then(|parameter| parameter.value)
            .map_or(true, |quality| quality.trim().parse::<f32>().is_ok_and(|quality| quality > 0.0));

        let coding = coding.trim();
        if coding.eq_ignore_ascii_case("gzip") || coding.eq_ignore_ascii_case("x-gzip") {
            gzip = Some(acceptable);
        } else if coding == "*" {
            wildcard = Some(acceptable);
        }
    }

    gzip.or(wildcard).unwrap_or(false)
}

fn is_compressible(content_type: &str) -> bool {
    let media_type = content_type.split(';').next().unwrap_or_default().trim();
    media_type.get(..5).is_some_and(|prefix| prefix.eq_ignore_ascii_case("text/"))
        || media_type.eq_ignore_ascii_case("application/json")
}

fn should_compress(headers: &Headers, status: StatusCode, length: Option<u64>, settings: &Settings, exchange: &Exchange) -> bool {
    if !settings.compression
            || !exchange.accepts_gzip
            || status == StatusCode::PartialContent
            || headers.contains_key(&HeaderField::CONTENT_ENCODING)
            || headers.contains_key(&HeaderField::CONTENT_RANGE) {
        return false;
    }

    if !headers.get_first(&HeaderField::CONTENT_TYPE).is_some_and(is_compressible) {
        return false;
    }

    match length {
        Some(length) => length > GZIP_MINIMUM_LENGTH
            && (length < GZIP_BUFFERED_THRESHOLD || exchange.version == HttpVersion::Http11),
        None => exchange.version == HttpVersion::Http11,
    }
}

fn into_reader(body: BodyKind) -> Box<dyn AsyncRead + Send + Unpin> {
    match body {
        BodyKind::Bytes(bytes) => Box::new(Cursor::new(bytes)),
        BodyKind::StaticString(string) => Box::new(string.as_bytes()),
        BodyKind::String(string) => Box::new(Cursor::new(string.into_bytes())),
        BodyKind::Sized { source, length } => Box::new(source.take(length)),
        BodyKind::Stream(source) => source,
    }
}

async fn into_bytes(body: BodyKind) -> io::Result<Cow<'static, [u8]>> {
    Ok(match body {
        BodyKind::Bytes(bytes) => Cow::Owned(bytes),
        BodyKind::StaticString(string) => Cow::Borrowed(string.as_bytes()),
        BodyKind::String(string) => Cow::Owned(string.into_bytes()),
        BodyKind::Sized { source, length } => {
            let mut bytes = Vec::new();
            source.take(length).read_to_end(&mut bytes).await?;
            if bytes.len() as u64 != length {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "body source ended before its declared length"));
            }
            Cow::Owned(bytes)
        }
        BodyKind::Stream(mut source) => {
            let mut bytes = Vec::new();
            source.read_to_end(&mut bytes).await?;
            Cow::Owned(bytes)
        }
    })
}

/// Decides how the body is framed, setting the framing headers.
async fn plan_transfer(headers: &mut Headers, status: StatusCode, body: Option<BodyKind>, settings: &Settings,
                       exchange: &Exchange, persistent: &mut bool) -> io::Result<Transfer> {
    let Some(body) = body else {
        if status.permits_content() {
            headers.put_direct(HeaderField::CONTENT_LENGTH, "0");
        }
        return Ok(Transfer::None);
    };

    let length = body.known_length();
    if should_compress(headers, status, length, settings, exchange) {
        headers.put_direct(HeaderField::CONTENT_ENCODING, "gzip");
        if !headers.contains_token(&HeaderField::VARY, "accept-encoding") {
            headers.add_direct(HeaderField::VARY, "accept-encoding");
        }

        if length.is_some_and(|length| length < GZIP_BUFFERED_THRESHOLD) {
            // The compressed length is only known after compressing, which
            // is wasted work for a HEAD request, so the field is omitted.
            if exchange.head_request {
                return Ok(Transfer::None);
            }

            let compressed = gzip_bytes(&into_bytes(body).await?)?;
            headers.put_direct(HeaderField::CONTENT_LENGTH, compressed.len().to_string());
            return Ok(Transfer::Bytes(Cow::Owned(compressed)));
        }

        headers.put_direct(HeaderField::TRANSFER_ENCODING, "chunked");
        return Ok(Transfer::GzipChunked(into_reader(body)));
    }

    Ok(match body {
        BodyKind::Stream(source) if exchange.version == HttpVersion::Http11 => {
            headers.put_direct(HeaderField::TRANSFER_ENCODING, "chunked");
            Transfer::Chunked(source)
        }
        BodyKind::Stream(source) => {
            *persistent = false;
            Transfer::CloseDelimited(source)
        }
        BodyKind::Sized { source, length } => {
            headers.put_direct(HeaderField::CONTENT_LENGTH, length.to_string());
            Transfer::Sized { source, length }
        }
        body => {
            let bytes = into_bytes(body).await?;
            headers.put_direct(HeaderField::CONTENT_LENGTH, bytes.len().to_string());
            Transfer::Bytes(bytes)
        }
    })
}

/// Writes the response, returning whether the connection persists.
async fn write_response<W>(output: &mut OutputWrapper<W>, settings: &Settings, response: Response, exchange: &Exchange,
                           mut persistent: bool) -> io::Result<bool>
        where W: AsyncWrite + Unpin {
    let Response { status, mut headers, body } = response;

    // The framing is determined here, never by the handler.
    headers.remove(&HeaderField::CONTENT_LENGTH);
    headers.remove(&HeaderField::TRANSFER_ENCODING);

    if !headers.contains_key(&HeaderField::DATE) {
        headers.put_direct(HeaderField::DATE, httpdate::fmt_http_date(SystemTime::now()));
    }

    let body = if status.permits_content() { body } else { None };
    let transfer = plan_transfer(&mut headers, status, body, settings, exchange, &mut persistent).await?;

    if !persistent {
        headers.put_direct(HeaderField::CONNECTION, "close");
    }

    output.write_status_line(status).await?;
    output.write_headers(&headers).await?;
    output.end_head().await?;

    if !exchange.head_request {
        match transfer {
            Transfer::None => (),
            Transfer::Bytes(bytes) => output.write_bytes(&bytes).await?,
            Transfer::Sized { mut source, length } => {
                output.transfer_from(&mut source, Some(length)).await?;
            }
            Transfer::Chunked(mut source) => {
                output.transfer_chunked_from(&mut source).await?;
            }
            Transfer::GzipChunked(mut source) => {
                output.transfer_gzip_from(&mut source).await?;
            }
            Transfer::CloseDelimited(mut source) => {
                output.transfer_from(&mut source, None).await?;
            }
        }
    }

    output.flush().await?;
    Ok(persistent)
}

/// Serves the requests arriving on the stream until the connection no longer
/// persists.
pub async fn serve_connection<S>(stream: S, config: &ServerConfig)
        where S: AsyncRead + AsyncWrite + Send + Unpin {
    serve(stream, config, None).await;
}

/// Like [`serve_connection`], closing the connection early when it's idle
/// and `shutdown` becomes `true`.
pub async fn serve_connection_until<S>(stream: S, config: &ServerConfig, shutdown: watch::Receiver<bool>)
        where S: AsyncRead + AsyncWrite + Send + Unpin {
    serve(stream, config, Some(shutdown)).await;
}

async fn serve<S>(stream: S, config: &ServerConfig, shutdown: Option<watch::Receiver<bool>>)
        where S: AsyncRead + AsyncWrite + Send + Unpin {
    let (reader, writer) = tokio::io::split(stream);
    let mut session = Session::new(BufReader::new(reader), writer, config);
    if let Some(shutdown) = shutdown {
        session = session.with_shutdown(shutdown);
    }
    session.run().await;
}
