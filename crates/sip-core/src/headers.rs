use std::slice::Iter;

use smol_str::SmolStr;

/// A single header field as received or as it will be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: SmolStr,
    pub value: SmolStr,
}

impl Header {
    pub fn new(name: impl Into<SmolStr>, value: impl Into<SmolStr>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Header names compare case-insensitively (RFC 3261 §7.3.1).
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// Ordered header list. Comma separated values of one header are stored as
/// separate entries, which is how the preparser hands them over.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<Header>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(headers: Vec<Header>) -> Self {
        Self(headers)
    }

    /// Appends a header value after any existing ones.
    pub fn push(&mut self, name: impl Into<SmolStr>, value: impl Into<SmolStr>) {
        self.0.push(Header::new(name, value));
    }

    /// Inserts a header value in front of the first header with the same
    /// name, or at the top of the list when the header is absent.
    pub fn push_front(&mut self, name: impl Into<SmolStr>, value: impl Into<SmolStr>) {
        let header = Header::new(name, value);
        let at = self
            .0
            .iter()
            .position(|h| h.is(header.name.as_str()))
            .unwrap_or(0);
        self.0.insert(at, header);
    }

    pub fn iter(&self) -> Iter<'_, Header> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First value of the named header.
    pub fn get(&self, name: &str) -> Option<&SmolStr> {
        self.0.iter().find(|h| h.is(name)).map(|h| &h.value)
    }

    /// All values of the named header, in message order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a SmolStr> + 'a {
        self.0.iter().filter(move |h| h.is(name)).map(|h| &h.value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|h| h.is(name))
    }

    /// Replaces every value of `name` with a single value, keeping the
    /// position of the first occurrence.
    pub fn set(&mut self, name: &str, value: impl Into<SmolStr>) {
        let value = value.into();
        match self.0.iter().position(|h| h.is(name)) {
            Some(at) => {
                self.0[at].value = value;
                let mut idx = 0;
                self.0.retain(|h| {
                    let keep = idx <= at || !h.is(name);
                    idx += 1;
                    keep
                });
            }
            None => self.push(SmolStr::new(name), value),
        }
    }

    /// Removes the first value of `name` and returns it.
    pub fn remove_first(&mut self, name: &str) -> Option<SmolStr> {
        let at = self.0.iter().position(|h| h.is(name))?;
        Some(self.0.remove(at).value)
    }

    /// Removes all values of `name`, returning how many were dropped.
    pub fn remove_all(&mut self, name: &str) -> usize {
        let before = self.0.len();
        self.0.retain(|h| !h.is(name));
        before - self.0.len()
    }

    pub fn into_inner(self) -> Vec<Header> {
        self.0
    }
}

impl Extend<Header> for Headers {
    fn extend<T: IntoIterator<Item = Header>>(&mut self, iter: T) {
        self.0.extend(iter);
    }
}

impl IntoIterator for Headers {
    type Item = Header;
    type IntoIter = std::vec::IntoIter<Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = &'a Header;
    type IntoIter = Iter<'a, Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
