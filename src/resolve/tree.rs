// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bounded traversals over metadata blobs.
//!
//! Platform metadata is an arbitrary JSON tree. Lookups walk it with an
//! explicit stack and a depth cap so adversarial payloads stay cheap.

use serde_json::Value;

/// Default recursion cap for [`find_string`]
pub const DEFAULT_MAX_DEPTH: usize = 8;

/// Follow a fixed key path through nested objects
pub fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |node, key| node.as_object()?.get(*key))
}

/// Follow a key path and return the string at its end
pub fn lookup_str<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    lookup(value, path).and_then(Value::as_str)
}

/// Depth-first search for the first string leaf accepted by `predicate`
///
/// Object members are visited in document order (serde_json keeps insertion
/// order only with `preserve_order`; otherwise keys are sorted, which is
/// still deterministic). Nodes deeper than `max_depth` are never inspected.
pub fn find_string<'a, P>(value: &'a Value, max_depth: usize, predicate: P) -> Option<&'a str>
where
    P: Fn(&str) -> bool,
{
    let mut stack: Vec<(&'a Value, usize)> = vec![(value, 0)];

    while let Some((node, depth)) = stack.pop() {
        match node {
            Value::String(s) if predicate(s) => return Some(s),
            Value::Object(map) if depth < max_depth => {
                stack.extend(map.values().rev().map(|child| (child, depth + 1)));
            }
            Value::Array(items) if depth < max_depth => {
                stack.extend(items.iter().rev().map(|child| (child, depth + 1)));
            }
            _ => {}
        }
    }

    None
}
