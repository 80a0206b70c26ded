use crate::config::types::*;
use crate::http::Method;
use crate::lexer::tokens::{Loc, Token, TokenType};
use crate::lexer::Lexer;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ConfigError {
    pub message: String,
    pub loc: Option<Loc>,
    pub file: String,
}

impl ConfigError {
    fn new(message: impl Into<String>, loc: Option<Loc>) -> Self {
        Self {
            message: message.into(),
            loc,
            file: String::new(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.file.is_empty() {
            write!(f, "{} ", self.file)?;
        }
        if let Some(loc) = self.loc {
            write!(f, "{} ", loc)?;
        }
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ConfigError {}

pub type ParseResult<T> = Result<T, ConfigError>;

/// Recursive-descent parser over the token list produced by the lexer.
///
/// Grammar (one `server { … }` block per configured virtual server):
///
/// ```text
/// config       := server*
/// server       := "server" "{" server_item* "}"
/// server_item  := listen | server_name | timeout | keep_alive_timeout
///               | keep_alive_max | session_timeout | cgi | common | location
/// location     := "location" path "{" location_item* "}"
/// location_item:= alias | limit_except | autoindex | return | common | location
/// common       := root | error_page | client_body_buffer_size | index
/// ```
pub struct ConfigParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl ConfigParser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    pub fn parse_file(path: &str) -> ParseResult<Config> {
        let input = std::fs::read_to_string(path).map_err(|e| ConfigError {
            message: format!("config file open failed: {}", e),
            loc: None,
            file: path.to_string(),
        })?;

        Self::parse_str(&input).map_err(|mut e| {
            e.file = path.to_string();
            e
        })
    }

    pub fn parse_str(input: &str) -> ParseResult<Config> {
        let tokens = Lexer::new(input).tokenize();
        let mut parser = ConfigParser::new(tokens);
        let mut config = Config::default();

        while parser.peek().is_some() {
            parser.expect_keyword("server")?;
            config.servers.push(Arc::new(parser.parse_server()?));
        }

        if config.servers.is_empty() {
            return Err(ConfigError::new("no server block in configuration", None));
        }

        Ok(config)
    }

    // ====== Token access ======

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_loc(&self) -> Option<Loc> {
        self.peek().map(|t| t.loc)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn bad_syntax<T>(&self, found: &Token) -> ParseResult<T> {
        Err(ConfigError::new(
            format!("bad syntax '{}'", found.kind),
            Some(found.loc),
        ))
    }

    fn eof_error<T>(&self, expected: &str) -> ParseResult<T> {
        Err(ConfigError::new(
            format!("expected {} but reached end of file", expected),
            self.tokens.last().map(|t| t.loc),
        ))
    }

    // ====== Consumption ======

    fn expect_keyword(&mut self, word: &str) -> ParseResult<()> {
        match self.next() {
            Some(Token { kind: TokenType::Ident(s), .. }) if s == word => Ok(()),
            Some(t) => Err(ConfigError::new(
                format!("expected '{}' but '{}'", word, t.kind),
                Some(t.loc),
            )),
            None => self.eof_error(word),
        }
    }

    fn expect_lbrace(&mut self) -> ParseResult<()> {
        match self.next() {
            Some(Token { kind: TokenType::LBrace, .. }) => Ok(()),
            Some(t) => Err(ConfigError::new(
                format!("expected '{{' but '{}'", t.kind),
                Some(t.loc),
            )),
            None => self.eof_error("'{'"),
        }
    }

    fn expect_semicolon(&mut self) -> ParseResult<()> {
        match self.next() {
            Some(Token { kind: TokenType::Semicolon, .. }) => Ok(()),
            Some(t) => Err(ConfigError::new(
                format!("expected ';' but '{}'", t.kind),
                Some(t.loc),
            )),
            None => self.eof_error("';'"),
        }
    }

    /// An identifier, also accepting a bare integer (numeric file names,
    /// hosts like `0.0.0.0` lex as idents already).
    fn expect_word(&mut self) -> ParseResult<(String, Loc)> {
        match self.next() {
            Some(Token { kind: TokenType::Ident(s), loc }) => Ok((s, loc)),
            Some(Token { kind: TokenType::Int(n), loc }) => Ok((n.to_string(), loc)),
            Some(t) => Err(ConfigError::new(
                format!("expected identifier but '{}'", t.kind),
                Some(t.loc),
            )),
            None => self.eof_error("identifier"),
        }
    }

    fn expect_int(&mut self) -> ParseResult<(u64, Loc)> {
        match self.next() {
            Some(Token { kind: TokenType::Int(n), loc }) => Ok((n, loc)),
            Some(t) => Err(ConfigError::new(
                format!("expected number but '{}'", t.kind),
                Some(t.loc),
            )),
            None => self.eof_error("number"),
        }
    }

    fn peek_is_int(&self) -> bool {
        matches!(self.peek().map(|t| &t.kind), Some(TokenType::Int(_)))
    }

    // ====== Blocks ======

    fn parse_server(&mut self) -> ParseResult<ServerConfig> {
        let mut conf = ServerConfig::default();

        self.expect_lbrace()?;
        loop {
            let token = match self.next() {
                Some(t) => t,
                None => return self.eof_error("'}'"),
            };
            match &token.kind {
                TokenType::RBrace => break,
                TokenType::Ident(word) => match word.as_str() {
                    "location" => {
                        let location = LocationConfig::from_server(&conf);
                        let parsed = self.parse_location(location)?;
                        conf.locations.push(parsed);
                    }
                    "listen" => self.parse_listen(&mut conf)?,
                    "server_name" => {
                        conf.server_name = self.expect_word()?.0;
                        self.expect_semicolon()?;
                    }
                    "timeout" => {
                        conf.timeout = self.expect_int()?.0;
                        self.expect_semicolon()?;
                    }
                    "keep_alive_timeout" => {
                        conf.keep_alive_timeout = self.expect_int()?.0;
                        self.expect_semicolon()?;
                    }
                    "keep_alive_max" => {
                        conf.keep_alive_max = self.expect_int()?.0 as u32;
                        self.expect_semicolon()?;
                    }
                    "session_timeout" => {
                        conf.session_timeout = self.expect_int()?.0;
                        self.expect_semicolon()?;
                    }
                    "cgi" => self.parse_cgi(&mut conf)?,
                    _ if self.is_common(word) => {
                        let word = word.clone();
                        self.parse_common(&word, &mut conf.common)?
                    }
                    _ => return self.bad_syntax(&token),
                },
                _ => return self.bad_syntax(&token),
            }
        }

        Ok(conf)
    }

    fn parse_location(&mut self, mut conf: LocationConfig) -> ParseResult<LocationConfig> {
        conf.path = self.expect_word()?.0;

        self.expect_lbrace()?;
        loop {
            let token = match self.next() {
                Some(t) => t,
                None => return self.eof_error("'}'"),
            };
            match &token.kind {
                TokenType::RBrace => break,
                TokenType::Ident(word) => match word.as_str() {
                    "location" => {
                        let nested = LocationConfig::from_location(&conf);
                        let parsed = self.parse_location(nested)?;
                        conf.locations.push(parsed);
                    }
                    "alias" => {
                        conf.alias = Some(self.expect_word()?.0);
                        self.expect_semicolon()?;
                    }
                    "limit_except" => self.parse_limit_except(&mut conf)?,
                    "autoindex" => self.parse_autoindex(&mut conf)?,
                    "return" => {
                        let (code, loc) = self.expect_int()?;
                        let code = self.status_code(code, loc)?;
                        let uri = self.expect_word()?.0;
                        conf.return_directive = Some((code, uri));
                        self.expect_semicolon()?;
                    }
                    _ if self.is_common(word) => {
                        let word = word.clone();
                        self.parse_common(&word, &mut conf.common)?
                    }
                    _ => return self.bad_syntax(&token),
                },
                _ => return self.bad_syntax(&token),
            }
        }

        Ok(conf)
    }

    // ====== Directives ======

    fn is_common(&self, word: &str) -> bool {
        matches!(
            word,
            "root" | "error_page" | "client_body_buffer_size" | "index"
        )
    }

    fn parse_common(&mut self, word: &str, conf: &mut CommonConfig) -> ParseResult<()> {
        match word {
            "root" => {
                conf.root = self.expect_word()?.0;
                self.expect_semicolon()?;
            }
            "client_body_buffer_size" => {
                conf.client_body_size = self.expect_int()?.0 as usize;
                self.expect_semicolon()?;
            }
            "index" => {
                // index <file>+;
                loop {
                    conf.index.push(self.expect_word()?.0);
                    if !matches!(
                        self.peek().map(|t| &t.kind),
                        Some(TokenType::Ident(_)) | Some(TokenType::Int(_))
                    ) {
                        break;
                    }
                }
                self.expect_semicolon()?;
            }
            "error_page" => {
                // error_page <code>+ <path>;
                let mut codes = Vec::new();
                while self.peek_is_int() {
                    let (code, loc) = self.expect_int()?;
                    codes.push(self.status_code(code, loc)?);
                }
                if codes.is_empty() {
                    return Err(ConfigError::new(
                        "error_page needs at least one status code",
                        self.peek_loc(),
                    ));
                }
                let page = self.expect_word()?.0;
                for code in codes {
                    conf.error_page.insert(code, page.clone());
                }
                self.expect_semicolon()?;
            }
            _ => unreachable!("checked by is_common"),
        }
        Ok(())
    }

    // listen <host>:<port>;
    fn parse_listen(&mut self, conf: &mut ServerConfig) -> ParseResult<()> {
        let (addr, loc) = self.expect_word()?;
        let (host, port) = addr.rsplit_once(':').ok_or_else(|| {
            ConfigError::new(format!("listen expects host:port, got '{}'", addr), Some(loc))
        })?;
        conf.host = host.to_string();
        conf.port = port.parse::<u16>().map_err(|_| {
            ConfigError::new(format!("invalid port '{}'", port), Some(loc))
        })?;
        self.expect_semicolon()?;
        Ok(())
    }

    // cgi <ext> <interpreter>;
    fn parse_cgi(&mut self, conf: &mut ServerConfig) -> ParseResult<()> {
        let ext = self.expect_word()?.0;
        let interpreter = self.expect_word()?.0;
        conf.cgi.push((ext, interpreter));
        self.expect_semicolon()?;
        Ok(())
    }

    // limit_except <method>+;
    fn parse_limit_except(&mut self, conf: &mut LocationConfig) -> ParseResult<()> {
        loop {
            let (word, loc) = self.expect_word()?;
            let method = Method::from_str(&word).map_err(|_| {
                ConfigError::new(format!("unknown method '{}'", word), Some(loc))
            })?;
            conf.limit_except.push(method);
            if !matches!(self.peek().map(|t| &t.kind), Some(TokenType::Ident(_))) {
                break;
            }
        }
        self.expect_semicolon()?;
        Ok(())
    }

    // autoindex on|off;
    fn parse_autoindex(&mut self, conf: &mut LocationConfig) -> ParseResult<()> {
        let (word, loc) = self.expect_word()?;
        conf.autoindex = match word.as_str() {
            "on" => true,
            "off" => false,
            _ => {
                return Err(ConfigError::new(
                    format!("autoindex expects on|off, got '{}'", word),
                    Some(loc),
                ))
            }
        };
        self.expect_semicolon()?;
        Ok(())
    }

    fn status_code(&self, code: u64, loc: Loc) -> ParseResult<u16> {
        if !(100..=599).contains(&code) {
            return Err(ConfigError::new(
                format!("invalid status code '{}'", code),
                Some(loc),
            ));
        }
        Ok(code as u16)
    }
}
