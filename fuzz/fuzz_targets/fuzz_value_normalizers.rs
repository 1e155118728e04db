// SPDX-License-Identifier: PMPL-1.0-or-later
// Fuzz target for identifier normalization and pattern translation

#![no_main]

use bson::Bson;
use docbridge_query::filter::{like_to_regex, parse_regex};
use docbridge_query::{key, Value};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Byte strings of any length must normalize without panicking
    let _ = key::normalize(Value::bytes(data.to_vec()));

    if let Ok(s) = std::str::from_utf8(data) {
        let _ = key::normalize(Value::from(s));

        // Delimited and bare patterns either parse or report MalformedRegex
        if let Ok(Bson::RegularExpression(re)) = parse_regex(Bson::String(s.to_string())) {
            assert!(re.options.chars().all(|c| c.is_ascii_alphabetic()));
        }

        // Every short LIKE pattern yields a regex the regex crate accepts
        if s.len() < 1024 {
            if let Ok(Bson::RegularExpression(re)) = like_to_regex(&Bson::String(s.to_string())) {
                assert!(regex::Regex::new(&re.pattern).is_ok());
            }
        }
    }
});
