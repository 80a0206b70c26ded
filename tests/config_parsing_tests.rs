use tidepool::config::{validate_config, ConfigParser};
use tidepool::http::Method;

#[test]
fn parses_full_server_block() {
    let input = r#"
server {
    listen 127.0.0.1:8080;
    server_name example;
    timeout 30;
    keep_alive_timeout 5;
    keep_alive_max 50;
    session_timeout 600;
    cgi .py /usr/bin/python3;
    cgi .sh /bin/sh;
    root /www;
    client_body_buffer_size 4096;
    index index.html index.htm;
    error_page 404 /errors/404.html;

    location /upload {
        limit_except POST DELETE;
        client_body_buffer_size 1048576;
    }
}
"#;
    let config = ConfigParser::parse_str(input).expect("should parse");
    assert_eq!(config.servers.len(), 1);

    let server = &config.servers[0];
    assert_eq!(server.host, "127.0.0.1");
    assert_eq!(server.port, 8080);
    assert_eq!(server.server_name, "example");
    assert_eq!(server.timeout, 30);
    assert_eq!(server.keep_alive_timeout, 5);
    assert_eq!(server.keep_alive_max, 50);
    assert_eq!(server.session_timeout, 600);
    assert_eq!(server.cgi.len(), 2);
    assert_eq!(server.cgi[0], (".py".to_string(), "/usr/bin/python3".to_string()));
    assert_eq!(server.common.root, "/www");
    assert_eq!(server.common.client_body_size, 4096);
    assert_eq!(server.common.index, vec!["index.html", "index.htm"]);
    assert_eq!(
        server.common.error_page.get(&404),
        Some(&"/errors/404.html".to_string())
    );

    let location = &server.locations[0];
    assert_eq!(location.path, "/upload");
    assert_eq!(location.limit_except, vec![Method::Post, Method::Delete]);
    assert_eq!(location.common.client_body_size, 1_048_576);
}

#[test]
fn location_inherits_enclosing_scope() {
    let input = r#"
server {
    listen 127.0.0.1:8080;
    root /www;
    error_page 500 /500.html;

    location /a {
        location /a/b {
            root /elsewhere;
        }
    }
}
"#;
    let config = ConfigParser::parse_str(input).unwrap();
    let outer = &config.servers[0].locations[0];
    let inner = &outer.locations[0];

    // The outer location copies the server scope; the inner overrides root
    // but keeps the inherited error page.
    assert_eq!(outer.common.root, "/www");
    assert_eq!(inner.common.root, "/elsewhere");
    assert_eq!(inner.common.error_page.get(&500), Some(&"/500.html".to_string()));
}

#[test]
fn error_page_accepts_multiple_codes() {
    let input = r#"
server {
    listen 127.0.0.1:8080;
    error_page 403 404 /missing.html;
}
"#;
    let config = ConfigParser::parse_str(input).unwrap();
    let pages = &config.servers[0].common.error_page;
    assert_eq!(pages.get(&403), Some(&"/missing.html".to_string()));
    assert_eq!(pages.get(&404), Some(&"/missing.html".to_string()));
}

#[test]
fn parses_multiple_servers() {
    let input = r#"
server {
    listen 127.0.0.1:8080;
    server_name one;
}
server {
    listen 127.0.0.1:8081;
    server_name two;
}
"#;
    let config = ConfigParser::parse_str(input).unwrap();
    assert_eq!(config.servers.len(), 2);
    assert_eq!(config.servers[0].server_name, "one");
    assert_eq!(config.servers[1].server_name, "two");
}

#[test]
fn return_directive_is_parsed() {
    let input = r#"
server {
    listen 127.0.0.1:8080;
    location /old {
        return 302 /new;
    }
}
"#;
    let config = ConfigParser::parse_str(input).unwrap();
    let location = &config.servers[0].locations[0];
    assert_eq!(
        location.return_directive,
        Some((302, "/new".to_string()))
    );
}

#[test]
fn autoindex_and_alias() {
    let input = r#"
server {
    listen 127.0.0.1:8080;
    location /static {
        alias /srv/files;
        autoindex on;
    }
}
"#;
    let config = ConfigParser::parse_str(input).unwrap();
    let location = &config.servers[0].locations[0];
    assert!(location.autoindex);
    assert_eq!(location.alias, Some("/srv/files".to_string()));
}

#[test]
fn missing_semicolon_is_located() {
    let input = "server {\n    listen 127.0.0.1:8080\n}\n";
    let err = ConfigParser::parse_str(input).unwrap_err();
    let rendered = format!("{}", err);
    assert!(rendered.contains("';'"), "got: {rendered}");
    assert!(err.loc.is_some());
}

#[test]
fn unknown_directive_is_bad_syntax() {
    let input = "server {\n    serve_name x;\n}\n";
    let err = ConfigParser::parse_str(input).unwrap_err();
    assert!(format!("{}", err).contains("bad syntax"));
}

#[test]
fn unknown_method_in_limit_except() {
    let input = "server {\n location / { limit_except FETCH; }\n}\n";
    let err = ConfigParser::parse_str(input).unwrap_err();
    assert!(format!("{}", err).contains("unknown method"));
}

#[test]
fn empty_config_is_rejected() {
    assert!(ConfigParser::parse_str("# nothing here\n").is_err());
}

#[test]
fn comments_are_skipped() {
    let input = r#"
# front matter
server {
    listen 127.0.0.1:8080; # trailing comment
    root /www;
}
"#;
    let config = ConfigParser::parse_str(input).unwrap();
    assert_eq!(config.servers[0].common.root, "/www");
}

#[test]
fn validate_rejects_cgi_extension_without_dot() {
    let input = r#"
server {
    listen 127.0.0.1:8080;
    cgi py /usr/bin/python3;
}
"#;
    let config = ConfigParser::parse_str(input).unwrap();
    let err = validate_config(&config).unwrap_err();
    assert!(format!("{}", err).contains("must start with '.'"));
}

#[test]
fn validate_rejects_relative_root() {
    let input = r#"
server {
    listen 127.0.0.1:8080;
    root www;
}
"#;
    let config = ConfigParser::parse_str(input).unwrap();
    assert!(validate_config(&config).is_err());
}

#[test]
fn validate_rejects_duplicate_servers() {
    let input = r#"
server {
    listen 127.0.0.1:8080;
    server_name same;
}
server {
    listen 127.0.0.1:8080;
    server_name same;
}
"#;
    let config = ConfigParser::parse_str(input).unwrap();
    let err = validate_config(&config).unwrap_err();
    assert!(format!("{}", err).contains("duplicate server"));
}

#[test]
fn validate_accepts_normal_config() {
    let input = r#"
server {
    listen 0.0.0.0:8080;
    server_name web;
    root /var/www;
    location / {
        limit_except GET HEAD;
    }
}
"#;
    let config = ConfigParser::parse_str(input).unwrap();
    assert!(validate_config(&config).is_ok());
}
