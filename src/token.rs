/// Associates readiness events with a registered [`event::Source`].
///
/// `Token` is a wrapper around `usize` and is used as an argument to
/// [`Registry::register`] and [`Registry::reregister`]. There is no
/// inherent mapping between `Token` and the registered [`event::Source`];
/// it is up to the caller to establish such a mapping, typically via a
/// slab or a map keyed by `Token::0`.
///
/// [`event::Source`]: crate::event::Source
/// [`Registry::register`]: crate::Registry::register
/// [`Registry::reregister`]: crate::Registry::reregister
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct Token(pub usize);

impl From<Token> for usize {
    fn from(val: Token) -> usize {
        val.0
    }
}

impl From<usize> for Token {
    fn from(val: usize) -> Token {
        Token(val)
    }
}
