//! Small helpers shared by the codecs and the prefix registry.

use std::borrow::Cow;

use percent_encoding::percent_decode_str;

/// Returns early with `$error` unless `$predicate` holds.
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;

/// Decodes `%XX` escapes in a url path. Malformed escapes are kept as they are; a path that
/// doesn't decode to valid UTF-8 is returned unchanged.
pub(crate) fn percent_decode(path: &str) -> String {
    percent_decode_str(path).decode_utf8().map_or_else(|_| path.to_string(), Cow::into_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_path() {
        assert_eq!(percent_decode("/plain/"), "/plain/");
        assert_eq!(percent_decode("/a%20b/%41"), "/a b/A");
        assert_eq!(percent_decode("/bad%zz/%4"), "/bad%zz/%4");
        assert_eq!(percent_decode("/%ff"), "/%ff");
        assert_eq!(percent_decode("/%E2%82%AC/%2F"), "/\u{20ac}//");
    }
}
