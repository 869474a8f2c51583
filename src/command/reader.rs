/// Cursor over an AT response, one comma separated parameter at a time.
///
/// A response may hold several lines, each optionally starting with the
/// command prefix (`+CGACT: 1,1\r\n+CGACT: 2,0`). [`next_line`] moves to the
/// next line carrying a given prefix; the `read_*` methods then consume its
/// parameters left to right. Quoted parameters may contain commas.
///
/// [`next_line`]: ResponseReader::next_line
#[derive(Debug, Clone)]
pub struct ResponseReader<'a> {
    rest: &'a [u8],
    params: &'a [u8],
    exhausted: bool,
}

impl<'a> ResponseReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            rest: buf,
            params: &[],
            exhausted: true,
        }
    }

    /// Reader positioned on a single line of parameters, prefix already
    /// stripped.
    pub fn from_params(params: &'a [u8]) -> Self {
        Self {
            rest: &[],
            params,
            exhausted: params.is_empty(),
        }
    }

    /// Advance to the next line starting with `prefix`. An empty prefix
    /// matches any non-empty line.
    pub fn next_line(&mut self, prefix: &str) -> bool {
        while !self.rest.is_empty() {
            let (line, rest) = match self.rest.iter().position(|&b| b == b'\n') {
                Some(i) => (&self.rest[..i], &self.rest[i + 1..]),
                None => (self.rest, &self.rest[self.rest.len()..]),
            };
            self.rest = rest;

            let line = trim(line);
            if line.is_empty() || !line.starts_with(prefix.as_bytes()) {
                continue;
            }
            let params = trim(&line[prefix.len()..]);
            self.params = params;
            self.exhausted = params.is_empty();
            return true;
        }
        false
    }

    /// `true` while the current line still has parameters to read.
    pub fn has_more(&self) -> bool {
        !self.exhausted
    }

    /// The next parameter with surrounding spaces removed, quotes kept.
    pub fn read_raw(&mut self) -> Option<&'a [u8]> {
        if self.exhausted {
            return None;
        }

        let mut quoted = false;
        let mut end = self.params.len();
        for (i, &b) in self.params.iter().enumerate() {
            match b {
                b'"' => quoted = !quoted,
                b',' if !quoted => {
                    end = i;
                    break;
                }
                _ => {}
            }
        }

        let param = trim(&self.params[..end]);
        if end < self.params.len() {
            self.params = &self.params[end + 1..];
        } else {
            self.params = &[];
            self.exhausted = true;
        }
        Some(param)
    }

    /// The next parameter as a decimal integer. An empty or malformed
    /// parameter is consumed and yields `None`.
    pub fn read_int(&mut self) -> Option<i32> {
        let param = unquote(self.read_raw()?);
        core::str::from_utf8(param).ok()?.parse().ok()
    }

    /// The next parameter as a string, without its quotes.
    pub fn read_string(&mut self) -> Option<&'a str> {
        core::str::from_utf8(unquote(self.read_raw()?)).ok()
    }

    /// The next parameter as a hex number, quoted or not.
    pub fn read_hex(&mut self) -> Option<u32> {
        let param = unquote(self.read_raw()?);
        if param.is_empty() {
            return None;
        }
        u32::from_str_radix(core::str::from_utf8(param).ok()?, 16).ok()
    }

    /// Skip `n` parameters.
    pub fn skip(&mut self, n: usize) {
        for _ in 0..n {
            if self.read_raw().is_none() {
                break;
            }
        }
    }

    /// The unread part of the current line.
    pub fn remainder(&self) -> &'a [u8] {
        self.params
    }
}

fn trim(mut s: &[u8]) -> &[u8] {
    while let [b' ' | b'\r' | b'\n' | b'\t', rest @ ..] = s {
        s = rest;
    }
    while let [rest @ .., b' ' | b'\r' | b'\n' | b'\t'] = s {
        s = rest;
    }
    s
}

fn unquote(s: &[u8]) -> &[u8] {
    match s {
        [b'"', inner @ .., b'"'] => inner,
        [b'"', inner @ ..] => inner,
        _ => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_multi_line_responses() {
        let mut r = ResponseReader::new(b"+CGACT: 1,0\r\n+CGACT: 2,1\r\n");
        assert!(r.next_line("+CGACT:"));
        assert_eq!(r.read_int(), Some(1));
        assert_eq!(r.read_int(), Some(0));
        assert_eq!(r.read_int(), None);
        assert!(r.next_line("+CGACT:"));
        assert_eq!(r.read_int(), Some(2));
        assert!(!r.next_line("+CGACT:"));
    }

    #[test]
    fn quoted_parameters_keep_commas() {
        let mut r = ResponseReader::from_params(b"1,\"a,b\",  \"07ba7016\" ,7");
        assert_eq!(r.read_int(), Some(1));
        assert_eq!(r.read_string(), Some("a,b"));
        assert_eq!(r.read_hex(), Some(0x07ba_7016));
        assert!(r.has_more());
        assert_eq!(r.read_int(), Some(7));
        assert!(!r.has_more());
    }

    #[test]
    fn empty_parameters_are_consumed() {
        let mut r = ResponseReader::from_params(b"4,,\"01000011\"");
        r.skip(1);
        assert_eq!(r.read_int(), None);
        assert_eq!(r.read_string(), Some("01000011"));
    }
}
