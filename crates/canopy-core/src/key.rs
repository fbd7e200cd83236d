//! Key normalization and sibling identity.
//!
//! Raw key values of any supported shape are turned into canonical [`Key`]s.
//! User keys are stable across renders; entries without a user key are
//! identified by their position in the sibling sequence through
//! [`Key::Fallback`], which can never collide with a user key. Tokens get
//! their own variants for the same reason.

use std::fmt;
use std::rc::{Rc, Weak};

use crate::collections::map::HashMap;
use crate::error::KeyError;
use crate::hash;
use crate::NodeId;

/// Reserved prefix of the canonical string form of fallback keys.
pub const FALLBACK_PREFIX: &str = "\u{0}#";

const TOKEN_PREFIX: &str = "\u{0}@";

// Dead local-token entries are swept once the table reaches this size.
const MIN_TOKEN_SWEEP: usize = 32;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    /// Caller-supplied identity.
    User(Rc<str>),
    /// Positional identity of an unkeyed entry.
    Fallback(usize),
    /// Interned identity of a shared token.
    SharedToken(Rc<str>),
    /// Counter identity of a local token.
    LocalToken(u64),
}

impl Key {
    pub fn user(value: impl Into<Rc<str>>) -> Self {
        Key::User(value.into())
    }

    pub fn fallback(position: usize) -> Self {
        Key::Fallback(position)
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Key::Fallback(_))
    }

    pub fn as_user(&self) -> Option<&str> {
        match self {
            Key::User(value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::User(value) => f.write_str(value),
            Key::Fallback(position) => write!(f, "{FALLBACK_PREFIX}{position}"),
            Key::SharedToken(name) => write!(f, "{TOKEN_PREFIX}{name}"),
            Key::LocalToken(id) => write!(f, "{TOKEN_PREFIX}#{id}"),
        }
    }
}

struct TokenInner {
    shared_name: Option<Rc<str>>,
    description: Option<String>,
}

/// A globally unique key token.
///
/// Shared tokens are interned by name: every `Token::shared("x")` resolves to
/// the same identity. Local tokens are unique per allocation and get a
/// counter-based identity the first time they are normalized.
#[derive(Clone)]
pub struct Token {
    inner: Rc<TokenInner>,
}

impl Token {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            inner: Rc::new(TokenInner {
                shared_name: None,
                description: Some(description.into()),
            }),
        }
    }

    pub fn shared(name: impl Into<Rc<str>>) -> Self {
        Self {
            inner: Rc::new(TokenInner {
                shared_name: Some(name.into()),
                description: None,
            }),
        }
    }

    pub fn shared_name(&self) -> Option<&str> {
        self.inner.shared_name.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.inner
            .description
            .as_deref()
            .or(self.inner.shared_name.as_deref())
    }

    fn address(&self) -> usize {
        Rc::as_ptr(&self.inner) as usize
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        match (self.shared_name(), other.shared_name()) {
            (Some(a), Some(b)) => a == b,
            _ => Rc::ptr_eq(&self.inner, &other.inner),
        }
    }
}

impl Eq for Token {}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("shared", &self.shared_name())
            .field("description", &self.description())
            .finish()
    }
}

/// Raw key input as supplied by render code.
#[derive(Clone, Debug, Default)]
pub enum RawKey {
    #[default]
    None,
    Number(f64),
    Text(String),
    Token(Token),
}

impl From<&str> for RawKey {
    fn from(value: &str) -> Self {
        RawKey::Text(value.to_owned())
    }
}

impl From<String> for RawKey {
    fn from(value: String) -> Self {
        RawKey::Text(value)
    }
}

impl From<&String> for RawKey {
    fn from(value: &String) -> Self {
        RawKey::Text(value.clone())
    }
}

impl From<f64> for RawKey {
    fn from(value: f64) -> Self {
        RawKey::Number(value)
    }
}

impl From<f32> for RawKey {
    fn from(value: f32) -> Self {
        RawKey::Number(f64::from(value))
    }
}

macro_rules! raw_key_from_int {
    ($($ty:ty),*) => {
        $(impl From<$ty> for RawKey {
            fn from(value: $ty) -> Self {
                RawKey::Number(value as f64)
            }
        })*
    };
}

raw_key_from_int!(i32, i64, u32, u64, usize);

impl From<Token> for RawKey {
    fn from(value: Token) -> Self {
        RawKey::Token(value)
    }
}

impl From<&Token> for RawKey {
    fn from(value: &Token) -> Self {
        RawKey::Token(value.clone())
    }
}

impl From<()> for RawKey {
    fn from(_: ()) -> Self {
        RawKey::None
    }
}

impl<T: Into<RawKey>> From<Option<T>> for RawKey {
    fn from(value: Option<T>) -> Self {
        value.map_or(RawKey::None, Into::into)
    }
}

/// Formats a finite number the way it appears as a key or as rendered text:
/// integral values print without a fractional part, `-0` prints as `0`.
pub fn format_number(value: f64) -> String {
    if value == 0.0 {
        return "0".to_owned();
    }
    if value.fract() == 0.0 && value.abs() < 1e21 {
        format!("{value:.0}")
    } else {
        format!("{value}")
    }
}

/// Normalizes raw keys and owns the out-of-band host-node key table.
pub struct KeyResolver {
    max_len: usize,
    next_token: u64,
    tokens: HashMap<usize, (Weak<TokenInner>, Key)>,
    sweep_at: usize,
    node_keys: HashMap<NodeId, Key>,
}

impl KeyResolver {
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len: max_len.max(1),
            next_token: 1,
            tokens: HashMap::default(),
            sweep_at: MIN_TOKEN_SWEEP,
            node_keys: HashMap::default(),
        }
    }

    /// Returns `Ok(None)` for missing keys and `Err` for non-finite numbers.
    pub fn normalize(&mut self, raw: &RawKey) -> Result<Option<Key>, KeyError> {
        match raw {
            RawKey::None => Ok(None),
            RawKey::Number(value) if !value.is_finite() => Err(KeyError::NonFinite(*value)),
            RawKey::Number(value) => Ok(Some(self.bounded(&format_number(*value)))),
            RawKey::Text(text) => Ok(Some(self.bounded(text))),
            RawKey::Token(token) => Ok(Some(self.token_key(token))),
        }
    }

    fn bounded(&self, text: &str) -> Key {
        if text.chars().count() <= self.max_len {
            return Key::user(text);
        }
        let head: String = text.chars().take(self.max_len).collect();
        Key::user(format!("{head}~{:016x}", hash::digest(text)))
    }

    fn token_key(&mut self, token: &Token) -> Key {
        if let Some(name) = token.shared_name() {
            return Key::SharedToken(Rc::from(name));
        }
        let address = token.address();
        if let Some((weak, key)) = self.tokens.get(&address) {
            if weak.upgrade().is_some_and(|live| Rc::ptr_eq(&live, &token.inner)) {
                return key.clone();
            }
        }
        if self.tokens.len() >= self.sweep_at {
            self.tokens.retain(|_, (weak, _)| weak.strong_count() > 0);
            self.sweep_at = (self.tokens.len() * 2).max(MIN_TOKEN_SWEEP);
        }
        let key = Key::LocalToken(self.next_token);
        self.next_token += 1;
        self.tokens
            .insert(address, (Rc::downgrade(&token.inner), key.clone()));
        key
    }

    /// Stashes a user key on a host node. Fallback keys are positional and
    /// never stashed.
    pub fn stash(&mut self, node: NodeId, key: Key) {
        if key.is_fallback() {
            return;
        }
        self.node_keys.insert(node, key);
    }

    /// Local tokens currently remembered, live or not yet swept.
    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    pub fn stashed(&self, node: NodeId) -> Option<&Key> {
        self.node_keys.get(&node)
    }

    pub fn forget(&mut self, node: NodeId) -> Option<Key> {
        self.node_keys.remove(&node)
    }

    /// Moves the key of `from` onto `to` when `from` carries one.
    pub fn carry_over(&mut self, from: NodeId, to: NodeId) {
        if let Some(key) = self.node_keys.remove(&from) {
            self.node_keys.insert(to, key);
        }
    }
}
