// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Glob matching for rule `*_pattern` fields (spec §6.1: "Pattern fields
//! use globs (`*`, `?`, character classes); empty/unset = match-all").

use glob::{MatchOptions, Pattern};

/// Case-sensitive, no path-separator semantics: these patterns match
/// suite/environment names, not filesystem paths, so `*` should cross
/// what would otherwise be a `/` boundary.
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Returns whether `value` matches `pattern`. `None` or an empty pattern
/// always matches, per spec §6.1. An unparseable pattern never matches
/// anything (rather than panicking or silently matching everything), so a
/// malformed rule simply falls through to the next rule or the default.
pub fn matches(pattern: Option<&str>, value: &str) -> bool {
    match pattern {
        None => true,
        Some(p) if p.is_empty() => true,
        Some(p) => Pattern::new(p)
            .map(|pat| pat.matches_with(value, MATCH_OPTIONS))
            .unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_or_empty_matches_everything() {
        assert!(matches(None, "anything"));
        assert!(matches(Some(""), "anything"));
    }

    #[test]
    fn star_matches_any_run() {
        assert!(matches(Some("smoke-*"), "smoke-tests"));
        assert!(!matches(Some("smoke-*"), "regression-tests"));
        assert!(matches(Some("*"), ""));
    }

    #[test]
    fn question_mark_matches_one_char() {
        assert!(matches(Some("v?.0"), "v1.0"));
        assert!(!matches(Some("v?.0"), "v10.0"));
    }

    #[test]
    fn character_class() {
        assert!(matches(Some("env-[sp]rod"), "env-prod"));
        assert!(matches(Some("env-[sp]rod"), "env-srod"));
        assert!(!matches(Some("env-[sp]rod"), "env-qrod"));
        assert!(matches(Some("env-[!p]rod"), "env-srod"));
        assert!(!matches(Some("env-[!p]rod"), "env-prod"));
    }

    #[test]
    fn exact_match_required_without_wildcards() {
        assert!(matches(Some("staging"), "staging"));
        assert!(!matches(Some("staging"), "staging2"));
    }
}
