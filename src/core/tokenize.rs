//! Bounded whitespace tokenizer.
//!
//! Both the trusted restriction arguments and the untrusted remote request
//! pass through here. The tokenizer never fails: it reports how many tokens
//! it dropped and whether the kept tokens blew the length budget, and the
//! caller decides what that means for its channel.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenLimits {
    pub max_tokens: usize,
    /// Budget for the summed byte length of the kept tokens.
    pub max_total_len: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tokens {
    pub tokens: Vec<String>,
    /// Summed byte length of `tokens`.
    pub total_len: usize,
    /// Tokens present in the input beyond `max_tokens`.
    pub dropped: usize,
    pub over_budget: bool,
}

impl Tokens {
    pub fn is_truncated(&self) -> bool {
        self.dropped > 0
    }

    pub fn as_strs(&self) -> Vec<&str> {
        self.tokens.iter().map(String::as_str).collect()
    }
}

pub fn tokenize(input: &str, limits: TokenLimits) -> Tokens {
    let mut out = Tokens::default();
    for token in input.split_whitespace() {
        if out.tokens.len() >= limits.max_tokens {
            out.dropped += 1;
            continue;
        }
        out.total_len += token.len();
        out.tokens.push(token.to_string());
    }
    out.over_budget = out.total_len > limits.max_total_len;
    out
}

/// Tokenize several arguments as one stream. sshd hands a forced command's
/// arguments over as a single `-c` string, so one argument may hold many tokens.
pub fn tokenize_args<S: AsRef<str>>(args: &[S], limits: TokenLimits) -> Tokens {
    let joined = args.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(" ");
    tokenize(&joined, limits)
}
