//! Single-line command frames: `[timestamp] command (-key value)*`.
//!
//! Tokens are space-separated; carriage returns are discarded so CRLF input
//! parses the same as LF. Keys are exactly two characters `-x` with
//! `x ∈ a..=z`, each followed by exactly one value token, and no key may
//! repeat within one command.


use common::{StoreError, StoreResult};

const KEY_COUNT: usize = 26;

/// One whitespace-delimited token and its index within the line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub pos: usize,
}

/// Forward-only cursor over the tokens of one input line.
#[derive(Clone, Debug, Default)]
pub struct TokenStream {
    tokens: Vec<Token>,
    cursor: usize,
}

impl TokenStream {
    /// Tokenize a line on spaces, discarding carriage returns.
    pub fn new(line: &str) -> Self {
        let mut tokens = Vec::new();
        let mut text = String::new();
        for ch in line.chars() {
            match ch {
                ' ' => {
                    if !text.is_empty() {
                        let pos = tokens.len();
                        tokens.push(Token {
                            text: std::mem::take(&mut text),
                            pos,
                        });
                    }
                }
                // CRLF input: the trailing CR is not part of any token.
                '\r' => {}
                _ => text.push(ch),
            }
        }
        if !text.is_empty() {
            let pos = tokens.len();
            tokens.push(Token { text, pos });
        }
        Self { tokens, cursor: 0 }
    }

    pub fn from_tokens(tokens: Vec<Token>) -> Self {
        Self { tokens, cursor: 0 }
    }

    /// Next unconsumed token, without advancing.
    pub fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor)
    }

    /// Consume and return the next token.
    pub fn next_token(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.cursor);
        if token.is_some() {
            self.cursor += 1;
        }
        token
    }

    /// True when the line held no tokens at all.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Index of the next token to be consumed.
    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn clear(&mut self) {
        self.tokens.clear();
        self.cursor = 0;
    }

    pub fn push(&mut self, token: Token) {
        self.tokens.push(token);
    }
}

/// A parsed command frame.
#[derive(Clone, Debug, Default)]
pub struct Command {
    timestamp: i64,
    name: String,
    args: [Option<String>; KEY_COUNT],
}

fn key_index(key: char) -> Option<usize> {
    key.is_ascii_lowercase()
        .then(|| key as usize - 'a' as usize)
}

impl Command {
    /// Parse one frame from a token stream.
    pub fn parse(stream: &mut TokenStream) -> StoreResult<Self> {
        let time = stream
            .next_token()
            .ok_or_else(|| StoreError::Parse("timestamp not found".into()))?;
        if time.text.len() <= 2 || !time.text.starts_with('[') || !time.text.ends_with(']') {
            return Err(StoreError::Parse("timestamp format error".into()));
        }
        let timestamp = time.text[1..time.text.len() - 1]
            .parse::<i64>()
            .map_err(|_| StoreError::Parse("timestamp invalid".into()))?;

        let name = stream
            .next_token()
            .ok_or_else(|| StoreError::Parse("command not found".into()))?
            .text
            .clone();

        let mut args: [Option<String>; KEY_COUNT] = Default::default();
        while let Some(key) = stream.next_token() {
            let mut chars = key.text.chars();
            let (dash, letter) = (chars.next(), chars.next());
            if key.text.len() != 2 || dash != Some('-') {
                return Err(StoreError::Parse("key format error".into()));
            }
            let idx = letter
                .and_then(key_index)
                .ok_or_else(|| StoreError::Parse("key invalid".into()))?;
            if args[idx].is_some() {
                return Err(StoreError::Parse("duplicated key".into()));
            }
            let key_text = key.text.clone();
            let value = stream.next_token().ok_or_else(|| {
                StoreError::Parse(format!("missing argument for key {key_text}"))
            })?;
            args[idx] = Some(value.text.clone());
        }

        Ok(Self {
            timestamp,
            name,
            args,
        })
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value of the `-key` argument, if it was given.
    pub fn arg(&self, key: char) -> Option<&str> {
        key_index(key).and_then(|idx| self.args[idx].as_deref())
    }

    /// True when every key in `must` is present and no key outside
    /// `must` ∪ `optional` appears.
    pub fn check(&self, must: &str, optional: &str) -> bool {
        for key in must.chars() {
            if self.arg(key).is_none() {
                return false;
            }
        }
        for (idx, value) in self.args.iter().enumerate() {
            if value.is_none() {
                continue;
            }
            let key = (b'a' + idx as u8) as char;
            if !must.contains(key) && !optional.contains(key) {
                return false;
            }
        }
        true
    }
}
