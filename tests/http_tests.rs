use std::io::Read;
use std::net::SocketAddr;
use std::sync::Arc;

use rstest::rstest;
use tidepool::config::ServerConfig;
use tidepool::http::connection::{Connection, Phase};
use tidepool::http::{unchunk, HttpRequest, HttpResponse, Method, RecvStatus, SendStatus};

fn configs() -> Vec<Arc<ServerConfig>> {
    vec![Arc::new(ServerConfig::default())]
}

fn parse(block: &str) -> Result<HttpRequest, u16> {
    let mut req = HttpRequest::new();
    match req.parse_header_block(block.as_bytes(), &configs()) {
        Ok(()) => Ok(req),
        Err(status) => Err(status),
    }
}

/// A connected loopback pair; the server side is the non-blocking mio
/// stream a `Connection` wraps.
fn loopback_pair() -> (std::net::TcpStream, mio::net::TcpStream, SocketAddr) {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let client = std::net::TcpStream::connect(addr).unwrap();
    let (server_side, peer) = listener.accept().unwrap();
    server_side.set_nonblocking(true).unwrap();
    (client, mio::net::TcpStream::from_std(server_side), peer)
}

fn test_connection() -> (std::net::TcpStream, Connection) {
    let (client, stream, peer) = loopback_pair();
    (client, Connection::new(stream, peer, configs()))
}

/*
 * ==============================================
 *                Request parsing
 * ==============================================
 */

#[test]
fn parses_simple_get() {
    let req = parse("GET /index.html HTTP/1.1\r\nHost: localhost\r\nX-Trace: 7").unwrap();
    assert_eq!(req.method, Method::Get);
    assert_eq!(req.path, "/index.html");
    assert_eq!(req.version, "HTTP/1.1");
    assert_eq!(req.headers.get("host").unwrap(), "localhost");
    assert_eq!(req.headers.get("x-trace").unwrap(), "7");
}

#[test]
fn splits_query_string() {
    let req = parse("GET /search?q=1&lang=en HTTP/1.1\r\nHost: x").unwrap();
    assert_eq!(req.path, "/search");
    assert_eq!(req.query_string, "q=1&lang=en");
}

#[rstest]
#[case("FETCH / HTTP/1.1", 501)]
#[case("GET index.html HTTP/1.1", 400)]
#[case("GET /a|b HTTP/1.1", 400)]
#[case("GET / HTTP/2.0", 505)]
#[case("GET / HTTP/1.0", 426)]
#[case("GET / ICMP/1.1", 400)]
#[case("GET / HTTP/x", 400)]
#[case("GET /", 400)]
#[case("GET /a b HTTP/1.1", 400)]
fn rejects_bad_request_lines(#[case] line: &str, #[case] expected: u16) {
    let block = format!("{line}\r\nHost: x");
    assert_eq!(parse(&block).unwrap_err(), expected);
}

#[test]
fn rejects_overlong_uri() {
    let uri = format!("/{}", "a".repeat(2100));
    let block = format!("GET {uri} HTTP/1.1\r\nHost: x");
    assert_eq!(parse(&block).unwrap_err(), 414);
}

#[test]
fn declared_length_over_budget_fails_early() {
    // Default client_body_buffer_size is 8192.
    let block = "POST /up HTTP/1.1\r\nHost: x\r\nContent-Length: 100000";
    assert_eq!(parse(block).unwrap_err(), 413);
}

#[test]
fn connection_close_header_is_honored() {
    let req = parse("GET / HTTP/1.1\r\nHost: x\r\nConnection: close").unwrap();
    assert_eq!(
        req.connection,
        tidepool::http::ConnectionHint::Close
    );
}

#[test]
fn resolves_virtual_server_by_host() {
    let configs = vec![
        Arc::new(ServerConfig {
            server_name: "alpha".to_string(),
            ..Default::default()
        }),
        Arc::new(ServerConfig {
            server_name: "beta".to_string(),
            ..Default::default()
        }),
    ];

    let mut req = HttpRequest::new();
    req.parse_header_block(b"GET / HTTP/1.1\r\nHost: beta:8080", &configs)
        .unwrap();
    assert_eq!(req.server_config.unwrap().server_name, "beta");
}

/*
 * ==============================================
 *               Chunked decoding
 * ==============================================
 */

fn chunk(data: &[u8], chunk_size: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for piece in data.chunks(chunk_size.max(1)) {
        out.extend_from_slice(format!("{:x}\r\n", piece.len()).as_bytes());
        out.extend_from_slice(piece);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"0\r\n\r\n");
    out
}

#[rstest]
#[case(b"hello world".to_vec(), 4)]
#[case(b"".to_vec(), 8)]
#[case(b"exactly16bytes!!".to_vec(), 16)]
#[case((0u8..=255).collect::<Vec<u8>>(), 7)]
fn chunked_round_trip(#[case] data: Vec<u8>, #[case] size: usize) {
    let encoded = chunk(&data, size);
    // The connection cuts at the terminator before unchunking.
    let terminator = encoded.len() - 5;
    assert_eq!(&encoded[terminator..], b"0\r\n\r\n");
    assert_eq!(unchunk(&encoded[..terminator]).unwrap(), data);
}

#[test]
fn unchunk_rejects_bad_size_line() {
    assert_eq!(unchunk(b"zz\r\nhello\r\n").unwrap_err(), 400);
}

#[test]
fn unchunk_rejects_size_payload_mismatch() {
    // Size says 5 but only 3 bytes precede the CRLF.
    assert_eq!(unchunk(b"5\r\nabc\r\n").unwrap_err(), 400);
}

/*
 * ==============================================
 *            Incremental assembly
 * ==============================================
 */

#[test]
fn assembles_request_split_across_reads() {
    let (_client, mut conn) = test_connection();

    conn.recv_buffer.extend_from_slice(b"GET /index.ht");
    assert!(!conn.advance_request());

    conn.recv_buffer.extend_from_slice(b"ml HTTP/1.1\r\nHost: x\r\n\r\n");
    assert!(conn.advance_request());
    assert!(conn.request.is_recv_status(RecvStatus::ReceiveDone));
    assert_eq!(conn.request.path, "/index.html");
}

#[test]
fn assembles_fixed_length_body_and_keeps_leftover() {
    let (_client, mut conn) = test_connection();

    conn.recv_buffer.extend_from_slice(
        b"POST /up HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\r\nhelloGET /",
    );
    assert!(conn.advance_request());
    assert_eq!(conn.request.body, b"hello");
    // Pipelined bytes survive for the next exchange.
    assert_eq!(conn.recv_buffer, b"GET /");
}

#[test]
fn assembles_chunked_body() {
    let (_client, mut conn) = test_connection();

    conn.recv_buffer
        .extend_from_slice(b"POST /up HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\n");
    assert!(!conn.advance_request());

    conn.recv_buffer.extend_from_slice(b"5\r\nHello\r\n");
    assert!(!conn.advance_request());

    conn.recv_buffer.extend_from_slice(b"7\r\n World!\r\n0\r\n\r\n");
    assert!(conn.advance_request());
    assert_eq!(conn.request.body, b"Hello World!");
}

#[test]
fn malformed_chunk_becomes_receive_error() {
    let (_client, mut conn) = test_connection();

    conn.recv_buffer.extend_from_slice(
        b"POST /up HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\nqq\r\nabc\r\n0\r\n\r\n",
    );
    assert!(conn.advance_request());
    assert!(conn.request.is_recv_status(RecvStatus::ReceiveError));
    assert_eq!(conn.request.error_status_code(), 400);
}

#[test]
fn header_parse_moves_phase_to_body() {
    let (_client, mut conn) = test_connection();
    assert_eq!(conn.phase, Phase::HeaderRead);

    conn.recv_buffer
        .extend_from_slice(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
    conn.advance_request();
    assert_eq!(conn.phase, Phase::BodyRead);
}

/*
 * ==============================================
 *              Response writing
 * ==============================================
 */

#[test]
fn response_wire_format() {
    let (mut client, mut stream, _) = loopback_pair();

    let mut res = HttpResponse::new(200);
    res.set_body(b"hello".to_vec(), "text/plain");
    while res.send_status != SendStatus::Done {
        res.send_chunk(&mut stream).unwrap();
    }
    drop(stream);

    let mut wire = Vec::new();
    client.read_to_end(&mut wire).unwrap();
    let text = String::from_utf8(wire).unwrap();

    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.contains("Content-Type: text/plain\r\n"));
    assert!(text.contains("Content-Length: 5\r\n"));
    assert!(text.contains("Date: "));
    assert!(text.ends_with("\r\n\r\nhello"));
}

#[test]
fn response_204_omits_content_length() {
    let (mut client, mut stream, _) = loopback_pair();

    let mut res = HttpResponse::new(204);
    while res.send_status != SendStatus::Done {
        res.send_chunk(&mut stream).unwrap();
    }
    drop(stream);

    let mut wire = Vec::new();
    client.read_to_end(&mut wire).unwrap();
    let text = String::from_utf8(wire).unwrap();

    assert!(text.starts_with("HTTP/1.1 204 No Content\r\n"));
    assert!(!text.contains("Content-Length"));
}

#[test]
fn repeated_set_cookie_headers_keep_order() {
    let mut res = HttpResponse::new(200);
    res.headers.add("set-cookie", "a=1");
    res.headers.add("set-cookie", "b=2");

    assert_eq!(res.headers.get_all("set-cookie"), vec!["a=1", "b=2"]);

    res.headers.set("set-cookie", "only=3");
    assert_eq!(res.headers.get_all("set-cookie"), vec!["only=3"]);
}

#[test]
fn status_text_table() {
    assert_eq!(HttpResponse::status_text(404), "Not Found");
    assert_eq!(HttpResponse::status_text(502), "Bad Gateway");
    assert_eq!(HttpResponse::status_text(504), "Gateway Timeout");
    assert_eq!(HttpResponse::status_text(426), "Upgrade Required");
}
