pub mod tokens;

use crate::lexer::tokens::{Loc, Token, TokenType};

/// Tokenizer for the configuration grammar. No token ever spans a line
/// and a `#` comment always runs to the end of one, so the input is lexed
/// line by line over string slices.
pub struct Lexer<'a> {
    input: &'a str,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input }
    }

    pub fn tokenize(&self) -> Vec<Token> {
        let mut tokens = Vec::new();
        for (index, line) in self.input.lines().enumerate() {
            lex_line(line, index + 1, &mut tokens);
        }
        tokens
    }
}

fn lex_line(line: &str, line_no: usize, tokens: &mut Vec<Token>) {
    let mut rest = line;
    let mut col = 1;

    loop {
        let trimmed = rest.trim_start();
        col += rest.chars().count() - trimmed.chars().count();
        rest = trimmed;

        let Some(c) = rest.chars().next() else { break };
        if c == '#' {
            break;
        }

        let loc = Loc { line: line_no, col };
        if let Some(kind) = punctuation(c) {
            tokens.push(Token { kind, loc });
            rest = &rest[1..];
            col += 1;
            continue;
        }

        // A word runs until whitespace, punctuation, or a comment; all-digit
        // words become numbers.
        let end = rest
            .find(|ch: char| ch.is_whitespace() || "{};#".contains(ch))
            .unwrap_or(rest.len());
        let word = &rest[..end];
        let kind = match word.parse::<u64>() {
            Ok(n) => TokenType::Int(n),
            Err(_) => TokenType::Ident(word.to_string()),
        };
        tokens.push(Token { kind, loc });
        col += word.chars().count();
        rest = &rest[end..];
    }
}

fn punctuation(c: char) -> Option<TokenType> {
    match c {
        '{' => Some(TokenType::LBrace),
        '}' => Some(TokenType::RBrace),
        ';' => Some(TokenType::Semicolon),
        _ => None,
    }
}
